// ── Device-resident scripts ──
//
// RouterOS script bodies installed during onboarding. Values are pasted in
// as-is; URLs and tokens come from the operator's own profile.

/// DHCP lease script calling the MAC onboarding webhook on every bind and
/// release. `$leaseActMAC`, `$leaseActIP` and `$leaseBound` are set by the
/// DHCP server when the script runs.
pub fn lease_script(url: &str, token: &str, sector: &str) -> String {
    format!(
        ":local mac $leaseActMAC; :local ip $leaseActIP; :local bound $leaseBound; \
         /tool fetch url=\"{url}?token={token}&mac=$mac&ip=$ip&bound=$bound&sector={sector}\" keep-result=no"
    )
}

/// Inputs of the periodic check-in script.
#[derive(Debug, Clone, Copy)]
pub struct CallHome<'a> {
    pub url: &'a str,
    pub token: Option<&'a str>,
    pub ip_lookup_url: &'a str,
    /// Interface whose MAC is reported; the first ethernet port if unset.
    pub mac_interface: Option<&'a str>,
    pub check_certificate: bool,
}

/// Check-in script: reports identity, serial, MAC and public address.
///
/// The public address comes from `ip_lookup_url`; when that lookup fails
/// the address reported by `/ip cloud` is used instead.
pub fn call_home_script(call: &CallHome<'_>) -> String {
    let mac_lookup = match call.mac_interface {
        Some(iface) => format!("[/interface get [find name=\"{iface}\"] mac-address]"),
        None => "[/interface ethernet get 0 mac-address]".to_owned(),
    };
    let check = if call.check_certificate { "yes" } else { "no" };
    let token = call.token.map_or_else(String::new, |t| format!("token={t}&"));
    let lookup = call.ip_lookup_url;
    let url = call.url;

    [
        ":local id [/system identity get name];".to_owned(),
        ":local serial \"\";".to_owned(),
        ":do { :set serial [/system routerboard get serial-number] } on-error={};".to_owned(),
        format!(":local mac {mac_lookup};"),
        ":local pub \"\";".to_owned(),
        format!(
            ":do {{ :set pub ([/tool fetch url=\"{lookup}\" output=user check-certificate={check} as-value]->\"data\") }} on-error={{}};"
        ),
        ":if ([:len $pub] = 0) do={ :do { :set pub [/ip cloud get public-address] } on-error={} };".to_owned(),
        format!(
            "/tool fetch url=\"{url}?{token}identity=$id&serial=$serial&mac=$mac&public_ip=$pub\" keep-result=no check-certificate={check}"
        ),
    ]
    .join("\n")
}

/// Scheduler `on-event` body running the named script.
pub fn run_script_event(script: &str) -> String {
    format!("/system script run {script}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_script_carries_token_and_sector() {
        insta::assert_snapshot!(
            lease_script("https://odoo.isp.example/isp/mac_onboarding", "s3cret", "NORTE"),
            @r#":local mac $leaseActMAC; :local ip $leaseActIP; :local bound $leaseBound; /tool fetch url="https://odoo.isp.example/isp/mac_onboarding?token=s3cret&mac=$mac&ip=$ip&bound=$bound&sector=NORTE" keep-result=no"#
        );
    }

    #[test]
    fn call_home_with_named_interface_and_token() {
        let script = call_home_script(&CallHome {
            url: "https://noc.isp.example/checkin",
            token: Some("t0k"),
            ip_lookup_url: "http://api.ipify.org",
            mac_interface: Some("ether1"),
            check_certificate: false,
        });
        insta::assert_snapshot!(script, @r#"
        :local id [/system identity get name];
        :local serial "";
        :do { :set serial [/system routerboard get serial-number] } on-error={};
        :local mac [/interface get [find name="ether1"] mac-address];
        :local pub "";
        :do { :set pub ([/tool fetch url="http://api.ipify.org" output=user check-certificate=no as-value]->"data") } on-error={};
        :if ([:len $pub] = 0) do={ :do { :set pub [/ip cloud get public-address] } on-error={} };
        /tool fetch url="https://noc.isp.example/checkin?token=t0k&identity=$id&serial=$serial&mac=$mac&public_ip=$pub" keep-result=no check-certificate=no
        "#);
    }

    #[test]
    fn call_home_without_token_uses_first_ethernet() {
        let script = call_home_script(&CallHome {
            url: "https://noc.isp.example/checkin",
            token: None,
            ip_lookup_url: "https://ifconfig.me/ip",
            mac_interface: None,
            check_certificate: true,
        });
        assert!(script.contains("[/interface ethernet get 0 mac-address]"));
        assert!(script.contains("checkin?identity=$id"));
        assert!(script.ends_with("check-certificate=yes"));
    }

    #[test]
    fn scheduler_event() {
        assert_eq!(run_script_event("isp_checkin"), "/system script run isp_checkin");
    }
}
