// In-memory RouterOS device
//
// Models the slice of RouterOS menu semantics the reconciliation engine
// relies on: ordered tables with `*N` ids, uniqueness on key fields
// (duplicate `add` traps), `set`/`remove`/`move` by id or name, ANDed
// `?field=value` print queries, and singleton settings menus. Every command
// is logged so callers can assert on what was actually sent.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::command::{Command, Record, Response};
use crate::error::Error;

/// Menus holding exactly one settings record (no ids, no add/remove).
const SINGLETONS: &[&str] = &[
    "/system/identity",
    "/system/resource",
    "/system/clock",
    "/ip/dns",
    "/ip/cloud",
    "/ip/neighbor/discovery-settings",
    "/tool/mac-server",
    "/tool/mac-server/mac-winbox",
];

/// Fields whose combined values must be unique within a menu.
fn unique_keys(menu: &str) -> &'static [&'static str] {
    match menu {
        "/interface"
        | "/interface/bridge"
        | "/interface/list"
        | "/ip/pool"
        | "/ip/dhcp-server"
        | "/ip/hotspot"
        | "/ip/hotspot/profile"
        | "/ip/hotspot/user"
        | "/ip/hotspot/user/profile"
        | "/ip/service"
        | "/ppp/secret"
        | "/ppp/profile"
        | "/queue/simple"
        | "/system/script"
        | "/system/scheduler"
        | "/user"
        | "/user/group" => &["name"],
        "/interface/bridge/port" | "/ip/dhcp-client" => &["interface"],
        "/interface/list/member" => &["list", "interface"],
        "/ip/address" => &["address"],
        "/ip/dhcp-server/network" => &["address"],
        "/ip/dhcp-server/lease" => &["mac-address"],
        _ => &[],
    }
}

/// Fields the device never returns from `print`.
fn write_only(menu: &str) -> &'static [&'static str] {
    match menu {
        "/user" => &["password"],
        _ => &[],
    }
}

#[derive(Debug)]
struct Injected {
    path: String,
    remaining: u32,
    message: String,
}

#[derive(Debug, Default)]
struct SimState {
    tables: BTreeMap<String, Vec<Record>>,
    singletons: BTreeMap<String, Record>,
    next_id: u32,
    log: Vec<Command>,
    failures: Vec<Injected>,
    stale: Vec<(String, u32)>,
}

/// A simulated RouterOS device.
#[derive(Debug)]
pub struct SimulatedDevice {
    host: String,
    state: Mutex<SimState>,
}

impl SimulatedDevice {
    /// A factory-default device: `admin` with an empty password, five
    /// ethernet ports, the management address on `ether1`, API enabled.
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        let device = Self {
            host: host.clone(),
            state: Mutex::new(SimState::default()),
        };

        {
            let mut state = device.lock();
            state.set_singleton("/system/identity", [("name", "MikroTik")]);
            state.set_singleton(
                "/system/resource",
                [
                    ("version", "7.14.3 (stable)"),
                    ("board-name", "hAP ac2"),
                    ("uptime", "1d02:03:04"),
                    ("cpu-load", "3"),
                ],
            );
            state.set_singleton("/ip/dns", [("servers", ""), ("allow-remote-requests", "false")]);
            state.set_singleton("/ip/cloud", [("public-address", "203.0.113.10")]);
            state.set_singleton(
                "/ip/neighbor/discovery-settings",
                [("discover-interface-list", "all")],
            );
            state.set_singleton("/tool/mac-server", [("allowed-interface-list", "all")]);
            state.set_singleton(
                "/tool/mac-server/mac-winbox",
                [("allowed-interface-list", "all")],
            );

            state.insert("/user", [("name", "admin"), ("group", "full"), ("password", "")]);
            for group in ["read", "write", "full"] {
                state.insert("/user/group", [("name", group), ("policy", "")]);
            }
            for (name, port, disabled) in [
                ("api", "8728", "false"),
                ("api-ssl", "8729", "true"),
                ("ssh", "22", "false"),
                ("winbox", "8291", "false"),
            ] {
                state.insert(
                    "/ip/service",
                    [("name", name), ("port", port), ("disabled", disabled)],
                );
            }
            for n in 1..=5 {
                let mac = format!("4C:5E:0C:00:00:{n:02X}");
                state.insert(
                    "/interface",
                    [
                        ("name", format!("ether{n}").as_str()),
                        ("type", "ether"),
                        ("mac-address", mac.as_str()),
                    ],
                );
            }
            let mgmt = format!("{host}/24");
            state.insert(
                "/ip/address",
                [("address", mgmt.as_str()), ("interface", "ether1")],
            );
            state.log.clear();
        }
        device
    }

    /// Replace the `admin` password.
    pub fn with_admin_password(self, password: &str) -> Self {
        {
            let mut state = self.lock();
            if let Some(admin) = state
                .table_mut("/user")
                .iter_mut()
                .find(|r| r.get("name") == Some("admin"))
            {
                admin.insert("password", password);
            }
        }
        self
    }

    /// Seed an extra record, e.g. a pre-existing firewall rule.
    pub fn with_record<'a>(self, menu: &str, fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        self.lock().insert(menu, fields);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Check a login against the `/user` table.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<(), Error> {
        let state = self.lock();
        let ok = state.table("/user").iter().any(|u| {
            u.get("name") == Some(username)
                && u.get("password").unwrap_or("") == password
                && !u.flag("disabled")
        });
        if ok {
            Ok(())
        } else {
            Err(Error::Authentication {
                message: "invalid user name or password (6)".into(),
            })
        }
    }

    /// Make the next `times` invocations of `path` trap with `message`.
    pub fn fail_next(&self, path: &str, times: u32, message: &str) {
        self.lock().failures.push(Injected {
            path: path.to_owned(),
            remaining: times,
            message: message.to_owned(),
        });
    }

    /// Make the next `times` prints of `menu` come back empty, as if the
    /// lookup raced with another writer.
    pub fn stale_reads(&self, menu: &str, times: u32) {
        self.lock().stale.push((menu.to_owned(), times));
    }

    /// Current rows of a table menu, in device order, write-only fields
    /// included.
    pub fn records(&self, menu: &str) -> Vec<Record> {
        self.lock().table(menu).to_vec()
    }

    /// Current value of a singleton menu.
    pub fn singleton(&self, menu: &str) -> Option<Record> {
        self.lock().singletons.get(menu).cloned()
    }

    /// Every command received so far.
    pub fn commands(&self) -> Vec<Command> {
        self.lock().log.clone()
    }

    /// Received commands other than `print`.
    pub fn mutations(&self) -> Vec<Command> {
        self.lock()
            .log
            .iter()
            .filter(|c| c.verb() != "print")
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Apply one command.
    pub fn execute(&self, cmd: &Command) -> Result<Response, Error> {
        let mut state = self.lock();
        state.log.push(cmd.clone());

        if let Some(injected) = state
            .failures
            .iter_mut()
            .find(|f| f.path == cmd.path() && f.remaining > 0)
        {
            injected.remaining -= 1;
            let message = injected.message.clone();
            return Err(Error::trap(cmd.path(), None, message));
        }

        let menu = cmd.menu().to_owned();
        if SINGLETONS.contains(&menu.as_str()) {
            return state.singleton_command(cmd, &menu);
        }

        match cmd.verb() {
            "print" => {
                if let Some(stale) = state
                    .stale
                    .iter_mut()
                    .find(|(m, remaining)| *m == menu && *remaining > 0)
                {
                    stale.1 -= 1;
                    return Ok(Response::default());
                }
                Ok(state.print(cmd, &menu))
            }
            "add" => state.add(cmd, &menu),
            "set" => state.set(cmd, &menu),
            "enable" | "disable" => {
                let value = if cmd.verb() == "disable" { "true" } else { "false" };
                let ids = state.resolve(cmd, &menu)?;
                for row in state.table_mut(&menu) {
                    if row.id().is_some_and(|id| ids.iter().any(|i| i == id)) {
                        row.insert("disabled", value);
                    }
                }
                Ok(Response::default())
            }
            "remove" => {
                let ids = state.resolve(cmd, &menu)?;
                state
                    .table_mut(&menu)
                    .retain(|row| !row.id().is_some_and(|id| ids.iter().any(|i| i == id)));
                Ok(Response::default())
            }
            "move" => state.move_items(cmd, &menu),
            "run" => {
                let ids = state.resolve(cmd, &menu)?;
                for row in state.table_mut(&menu) {
                    if row.id().is_some_and(|id| ids.iter().any(|i| i == id)) {
                        let count = row
                            .get("run-count")
                            .and_then(|c| c.parse::<u32>().ok())
                            .unwrap_or(0);
                        row.insert("run-count", (count + 1).to_string());
                    }
                }
                Ok(Response::default())
            }
            _ => Err(Error::trap(cmd.path(), Some(0), "no such command")),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SimState {
    fn table(&self, menu: &str) -> &[Record] {
        self.tables.get(menu).map_or(&[], Vec::as_slice)
    }

    fn table_mut(&mut self, menu: &str) -> &mut Vec<Record> {
        self.tables.entry(menu.to_owned()).or_default()
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("*{:X}", self.next_id)
    }

    fn insert<'a>(&mut self, menu: &str, fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
        let id = self.allocate_id();
        let mut record: Record = fields.into_iter().collect();
        record.insert(".id", id.clone());
        self.table_mut(menu).push(record);
        id
    }

    fn set_singleton<'a>(&mut self, menu: &str, fields: impl IntoIterator<Item = (&'a str, &'a str)>) {
        self.singletons
            .insert(menu.to_owned(), fields.into_iter().collect());
    }

    fn singleton_command(&mut self, cmd: &Command, menu: &str) -> Result<Response, Error> {
        match cmd.verb() {
            "print" | "get" => Ok(Response {
                records: self.singletons.get(menu).cloned().into_iter().collect(),
                ret: None,
            }),
            "set" => {
                let record = self.singletons.entry(menu.to_owned()).or_default();
                for (k, v) in cmd.arguments() {
                    record.insert(k.clone(), v.clone());
                }
                Ok(Response::default())
            }
            _ => Err(Error::trap(cmd.path(), Some(0), "no such command")),
        }
    }

    fn print(&self, cmd: &Command, menu: &str) -> Response {
        let hidden = write_only(menu);
        let records = self
            .table(menu)
            .iter()
            .filter(|row| {
                cmd.queries()
                    .iter()
                    .all(|(field, value)| row.get(field).unwrap_or("") == value)
            })
            .map(|row| {
                let mut row = row.clone();
                for field in hidden {
                    row.remove(field);
                }
                row
            })
            .collect();
        Response { records, ret: None }
    }

    fn add(&mut self, cmd: &Command, menu: &str) -> Result<Response, Error> {
        let keys = unique_keys(menu);
        if !keys.is_empty() && keys.iter().all(|k| cmd.get(k).is_some()) {
            let duplicate = self
                .table(menu)
                .iter()
                .any(|row| keys.iter().all(|k| row.get(k) == cmd.get(k)));
            if duplicate {
                return Err(Error::trap(
                    cmd.path(),
                    Some(1),
                    format!("failure: already have {} with such {}", entry_noun(menu), keys.join("/")),
                ));
            }
        }

        if menu == "/interface/bridge/port" {
            let iface = cmd.get("interface").unwrap_or("");
            if !self.table("/interface").iter().any(|r| r.get("name") == Some(iface)) {
                return Err(Error::trap(
                    cmd.path(),
                    Some(1),
                    "input does not match any value of interface",
                ));
            }
        }

        let id = self.insert(
            menu,
            cmd.arguments().iter().map(|(k, v)| (k.as_str(), v.as_str())),
        );
        if menu == "/interface/bridge" {
            if let Some(name) = cmd.get("name") {
                self.insert("/interface", [("name", name), ("type", "bridge")]);
            }
        }
        Ok(Response {
            records: Vec::new(),
            ret: Some(id),
        })
    }

    fn set(&mut self, cmd: &Command, menu: &str) -> Result<Response, Error> {
        let ids = self.resolve(cmd, menu)?;
        for row in self.table_mut(menu) {
            if row.id().is_some_and(|id| ids.iter().any(|i| i == id)) {
                for (k, v) in cmd.arguments() {
                    if k != ".id" && k != "numbers" {
                        row.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        Ok(Response::default())
    }

    fn move_items(&mut self, cmd: &Command, menu: &str) -> Result<Response, Error> {
        let ids = self.resolve(cmd, menu)?;
        let table = self.table_mut(menu);
        let (moving, mut rest): (Vec<Record>, Vec<Record>) = table
            .drain(..)
            .partition(|row| row.id().is_some_and(|id| ids.iter().any(|i| i == id)));

        let position = match cmd.get("destination") {
            Some(dest) => match rest.iter().position(|r| r.id() == Some(dest)) {
                Some(pos) => pos,
                None => {
                    // Put everything back before failing.
                    rest.extend(moving);
                    *table = rest;
                    return Err(Error::trap(cmd.path(), Some(0), "no such item"));
                }
            },
            None => rest.len(),
        };
        rest.splice(position..position, moving);
        *table = rest;
        Ok(Response::default())
    }

    /// Resolve `.id` / `numbers` (ids or names, comma separated).
    fn resolve(&self, cmd: &Command, menu: &str) -> Result<Vec<String>, Error> {
        let Some(spec) = cmd.get(".id").or_else(|| cmd.get("numbers")).or_else(|| cmd.get("number")) else {
            return Err(Error::trap(cmd.path(), Some(0), "no such item"));
        };
        let table = self.table(menu);
        spec.split(',')
            .map(|token| {
                table
                    .iter()
                    .find(|r| r.id() == Some(token) || r.get("name") == Some(token))
                    .and_then(|r| r.id().map(str::to_owned))
                    .ok_or_else(|| Error::trap(cmd.path(), Some(0), "no such item"))
            })
            .collect()
    }
}

fn entry_noun(menu: &str) -> &str {
    menu.rsplit('/').next().unwrap_or("entry")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_add_traps_as_already_exists() {
        let dev = SimulatedDevice::new("10.0.0.2");
        let add = Command::add("/ip/pool")
            .arg("name", "pool-lan")
            .arg("ranges", "192.168.88.10-192.168.88.254");
        dev.execute(&add).unwrap();
        let err = dev.execute(&add).unwrap_err();
        assert!(err.is_already_exists(), "{err}");
        assert_eq!(dev.records("/ip/pool").len(), 1);
    }

    #[test]
    fn print_queries_are_anded() {
        let dev = SimulatedDevice::new("10.0.0.2")
            .with_record("/ip/firewall/filter", [("comment", "A"), ("src-address", "1.1.1.1")])
            .with_record("/ip/firewall/filter", [("comment", "A"), ("src-address", "2.2.2.2")]);
        let rows = dev
            .execute(
                &Command::print("/ip/firewall/filter")
                    .query("comment", "A")
                    .query("src-address", "2.2.2.2"),
            )
            .unwrap()
            .records;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("src-address"), Some("2.2.2.2"));
    }

    #[test]
    fn move_places_before_destination() {
        let dev = SimulatedDevice::new("10.0.0.2")
            .with_record("/ip/firewall/filter", [("comment", "DROP")])
            .with_record("/ip/firewall/filter", [("comment", "ALLOW")]);
        let rows = dev.records("/ip/firewall/filter");
        let drop_id = rows[0].id().unwrap().to_owned();
        let allow_id = rows[1].id().unwrap().to_owned();

        dev.execute(
            &Command::new("/ip/firewall/filter/move")
                .arg("numbers", allow_id)
                .arg("destination", drop_id),
        )
        .unwrap();

        let order: Vec<_> = dev
            .records("/ip/firewall/filter")
            .iter()
            .map(|r| r.get("comment").unwrap().to_owned())
            .collect();
        assert_eq!(order, vec!["ALLOW", "DROP"]);
    }

    #[test]
    fn set_by_name_and_missing_item() {
        let dev = SimulatedDevice::new("10.0.0.2");
        dev.execute(&Command::set("/ip/service").arg("numbers", "api-ssl").arg("disabled", "no"))
            .unwrap();
        let svc = dev
            .records("/ip/service")
            .into_iter()
            .find(|r| r.get("name") == Some("api-ssl"))
            .unwrap();
        assert_eq!(svc.get("disabled"), Some("no"));

        let err = dev
            .execute(&Command::set("/ip/pool").arg("numbers", "nope").arg("ranges", "x"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn user_passwords_are_write_only() {
        let dev = SimulatedDevice::new("10.0.0.2").with_admin_password("boot");
        dev.authenticate("admin", "boot").unwrap();
        assert!(dev.authenticate("admin", "").is_err());

        let rows = dev.execute(&Command::print("/user")).unwrap().records;
        assert!(rows[0].get("password").is_none());
    }

    #[test]
    fn injected_failures_are_consumed() {
        let dev = SimulatedDevice::new("10.0.0.2");
        dev.fail_next("/ip/pool/add", 1, "timeout while waiting for program");
        let add = Command::add("/ip/pool").arg("name", "p").arg("ranges", "a-b");
        assert!(dev.execute(&add).is_err());
        dev.execute(&add).unwrap();
    }

    #[test]
    fn bridge_port_requires_known_interface() {
        let dev = SimulatedDevice::new("10.0.0.2");
        let err = dev
            .execute(
                &Command::add("/interface/bridge/port")
                    .arg("bridge", "bridge-lan")
                    .arg("interface", "sfp1"),
            )
            .unwrap_err();
        assert!(!err.is_already_exists());
        assert!(!err.is_not_found());
    }
}
