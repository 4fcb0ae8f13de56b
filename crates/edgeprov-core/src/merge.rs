// ── Layered configuration merge ──

use serde_json::{Map, Value};

/// Layer `overlay` on top of `base`.
///
/// Objects merge key by key, recursively. A `null` in the overlay never
/// replaces anything, so an authority that leaves a field unset keeps the
/// local value. Every other overlay value (including `""`, `[]`, `false`)
/// replaces the base value outright. Sections the base lacks are taken
/// from the overlay with their `null`s dropped at every depth.
pub fn merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (_, Value::Null) => base.clone(),
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                let next = match merged.get(key) {
                    Some(existing) => merge(existing, value),
                    None if value.is_object() => merge(&Value::Object(Map::new()), value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "mgmt_subnet": "192.168.88.0/24",
            "routeros": {
                "api_port": 8728,
                "allowed_mgmt_ips": ["10.0.0.5"],
                "config": {"wan_interface": "ether1", "enable_nat": true}
            }
        })
    }

    #[test]
    fn empty_overlay_is_identity() {
        assert_eq!(merge(&sample(), &json!({})), sample());
    }

    #[test]
    fn null_never_overrides() {
        assert_eq!(merge(&sample(), &json!({"mgmt_subnet": null})), sample());
        assert_eq!(merge(&sample(), &json!({"k": null})), sample());
        assert_eq!(merge(&sample(), &Value::Null), sample());
        assert_eq!(
            merge(&sample(), &json!({"routeros": {"config": {"wan_interface": null}}})),
            sample()
        );
    }

    #[test]
    fn nested_maps_merge_and_scalars_replace() {
        let merged = merge(
            &sample(),
            &json!({
                "routeros": {
                    "allowed_mgmt_ips": ["10.0.0.6", "10.0.0.7"],
                    "config": {"enable_nat": false, "dhcp_pool": "pon_pool"}
                }
            }),
        );
        assert_eq!(
            merged,
            json!({
                "mgmt_subnet": "192.168.88.0/24",
                "routeros": {
                    "api_port": 8728,
                    "allowed_mgmt_ips": ["10.0.0.6", "10.0.0.7"],
                    "config": {"wan_interface": "ether1", "enable_nat": false, "dhcp_pool": "pon_pool"}
                }
            })
        );
    }

    #[test]
    fn nested_null_under_a_new_section_is_dropped() {
        let merged = merge(
            &json!({"sector_code": "NORTE"}),
            &json!({
                "naming": {"identity_prefix": "RB-", "identity_format": null},
                "call_home": {"enabled": true, "iface": {"name": null, "fallback": "ether1"}}
            }),
        );
        assert_eq!(
            merged,
            json!({
                "sector_code": "NORTE",
                "naming": {"identity_prefix": "RB-"},
                "call_home": {"enabled": true, "iface": {"fallback": "ether1"}}
            })
        );
    }

    #[test]
    fn empty_string_is_a_value() {
        let merged = merge(&sample(), &json!({"mgmt_subnet": ""}));
        assert_eq!(merged["mgmt_subnet"], json!(""));
    }

    #[test]
    fn overlay_replaces_mismatched_shapes() {
        assert_eq!(merge(&json!({"a": {"b": 1}}), &json!({"a": 5})), json!({"a": 5}));
        assert_eq!(merge(&json!({"a": 5}), &json!({"a": {"b": 1}})), json!({"a": {"b": 1}}));
    }
}
