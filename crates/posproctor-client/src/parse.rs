//! Commander XML document parsing.
//!
//! Element names are matched on their local part, so the vendor
//! namespace prefixes (`vfi:`, `diag:`) do not matter.

use std::collections::BTreeMap;

use roxmltree::{Document, Node};
use tracing::warn;

use posproctor_core::{DeviceKey, DeviceKind, FepRole, FepStatus, Status};

use crate::classify::QueryFailure;

const PUMP: &str = "Pump";
const DCR: &str = "DCR";
const PRICE_DISPLAY: &str = "Fuel Price Display";

/// Device statuses extracted from a `vforecourtdiagnostics` document.
pub type Forecourt = BTreeMap<DeviceKey, Status>;

/// FEP statuses extracted from a `vpaymentdiagnostics` document, keyed
/// by FEP brand name.
pub type Payment = BTreeMap<String, FepStatus>;

fn is(node: &Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn document<'a>(body: &'a [u8], kind: &'static str) -> Result<Document<'a>, QueryFailure> {
    let text = std::str::from_utf8(body).map_err(|e| QueryFailure::malformed(kind, e.to_string()))?;
    Document::parse(text).map_err(|e| QueryFailure::malformed(kind, e.to_string()))
}

/// Extract the session token from a `validate` response.
///
/// A well-formed document without a `cookie` is how the controller
/// refuses credentials.
pub fn session_cookie(body: &[u8]) -> Result<String, QueryFailure> {
    let doc = document(body, "validate")?;
    doc.descendants()
        .find(|n| is(n, "cookie"))
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| QueryFailure::AuthRejected("no session cookie in validate response".to_string()))
}

/// Online iff `status="Online"` and `isAvailable="true"`.
fn device_status(node: &Node<'_, '_>) -> Status {
    Status::from_online(
        node.attribute("status") == Some("Online") && node.attribute("isAvailable") == Some("true"),
    )
}

/// Extract controller, pump, DCR and price-sign status.
pub fn forecourt(body: &[u8]) -> Result<Forecourt, QueryFailure> {
    let doc = document(body, "forecourt")?;
    let mut devices = BTreeMap::new();

    let controller = doc
        .descendants()
        .find(|n| is(n, "controller"))
        .ok_or_else(|| QueryFailure::malformed("forecourt", "missing controller element"))?;
    devices.insert(
        DeviceKey::controller(),
        Status::from_online(controller.attribute("status") == Some("Online")),
    );

    for fp in doc.descendants().filter(|n| is(n, "fuelingPoint")) {
        let Some(sysid) = fp.attribute("sysid").filter(|s| !s.is_empty()) else {
            continue;
        };
        for (device_type, kind) in [(PUMP, DeviceKind::Pump), (DCR, DeviceKind::Dcr)] {
            let found = fp
                .descendants()
                .find(|d| is(d, "device") && d.attribute("type") == Some(device_type));
            if let Some(device) = found {
                devices.insert(DeviceKey::new(kind, sysid), device_status(&device));
            }
        }
    }

    for sign in doc
        .descendants()
        .filter(|n| is(n, "device") && n.attribute("type") == Some(PRICE_DISPLAY))
    {
        match sign.attribute("id").filter(|s| !s.is_empty()) {
            Some(id) => {
                devices.insert(DeviceKey::new(DeviceKind::PriceSign, id), device_status(&sign));
            }
            None => warn!("fuel price display without an id attribute, skipping"),
        }
    }

    Ok(devices)
}

/// Extract primary and loyalty FEP status.
///
/// `connectionStatus` other than `true` (including `Undetermined`)
/// counts as offline. Entries without a `connectionStatus` are skipped.
pub fn payment(body: &[u8], loyalty_names: &[String]) -> Result<Payment, QueryFailure> {
    let doc = document(body, "payment")?;
    let mut feps = BTreeMap::new();
    let mut have_primary = false;
    let mut have_loyalty = false;

    for fep in doc.descendants().filter(|n| is(n, "fepDetail")) {
        let name = fep.attribute("fepName").unwrap_or_default();
        let Some(connection) = fep
            .children()
            .find(|c| is(c, "connectionStatus"))
            .and_then(|c| c.text())
        else {
            continue;
        };
        let status = Status::from_online(connection.trim().eq_ignore_ascii_case("true"));

        let primary = fep
            .attribute("isPrimary")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        // A FEP map entry carries one role; primary wins when both match.
        if primary && !have_primary {
            have_primary = true;
            feps.insert(name.to_string(), FepStatus { role: FepRole::Primary, status });
            continue;
        }

        let loyalty = loyalty_names.iter().any(|l| l.eq_ignore_ascii_case(name));
        if loyalty && !have_loyalty {
            have_loyalty = true;
            feps.insert(name.to_string(), FepStatus { role: FepRole::Loyalty, status });
        }
    }

    Ok(feps)
}
