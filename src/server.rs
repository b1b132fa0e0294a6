//! Service-wide settings and device discovery

use crate::ipp::{GroupTag, IppRequest, Op, Value};
use crate::session::{Resource, Session};
use crate::transport::Channel;
use crate::validate::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

const CONFIG_RESOURCE: &str = "/admin/conf/cupsd.conf";

/// One device reported by the service backends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub class: Option<String>,
    pub id: Option<String>,
    pub info: Option<String>,
    pub make_and_model: Option<String>,
    pub uri: Option<String>,
    pub location: Option<String>,
}

impl<C: Channel> Session<C> {
    /// Top-level directives of the service configuration. Directives inside
    /// `<Location>`-style blocks are policy internals, not settings, and are
    /// left out. Later duplicates win, matching how the service reads its
    /// own file.
    pub async fn server_get_settings(&mut self) -> Option<BTreeMap<String, String>> {
        match self.fetch(CONFIG_RESOURCE).await {
            Some((200, body)) => match String::from_utf8(body) {
                Ok(content) => Some(parse_directives(&content)),
                Err(_) => {
                    self.set_internal_status(Some("Cannot get server settings.".into()));
                    None
                }
            },
            _ => {
                self.set_internal_status(Some("Cannot get server settings.".into()));
                None
            }
        }
    }

    /// Merge directives into the service configuration and upload it. The
    /// service restarts after accepting the file, so the connection is
    /// re-established unconditionally.
    pub async fn server_set_settings(&mut self, settings: &BTreeMap<String, String>) -> bool {
        // Validate everything before touching anything.
        for (name, value) in settings {
            if !self.check(Role::OptionName, Some(name))
                || !self.check(Role::OptionValue, Some(value))
            {
                return false;
            }
        }

        let content = match self.fetch(CONFIG_RESOURCE).await {
            Some((200, body)) => match String::from_utf8(body) {
                Ok(content) => content,
                Err(_) => {
                    self.set_internal_status(Some("Cannot set server settings.".into()));
                    return false;
                }
            },
            _ => {
                self.set_internal_status(Some("Cannot set server settings.".into()));
                return false;
            }
        };

        info!("updating {} server directives", settings.len());
        let merged = merge_directives(&content, settings);

        let status = self.store(CONFIG_RESOURCE, merged.as_bytes()).await;
        self.reconnect().await;

        match status {
            Some(status) => {
                self.set_status_from_http(status);
                if status == 200 || status == 201 {
                    true
                } else {
                    self.set_internal_status(Some("Cannot set server settings.".into()));
                    false
                }
            }
            None => false,
        }
    }

    /// Ask the service backends which devices they can see right now.
    /// `timeout` is in seconds; scheme lists filter which backends run.
    pub async fn devices_get(
        &mut self,
        timeout: Option<i32>,
        limit: Option<i32>,
        include_schemes: &[String],
        exclude_schemes: &[String],
    ) -> Option<Vec<DeviceRecord>> {
        for scheme in include_schemes.iter().chain(exclude_schemes) {
            if !self.check(Role::Scheme, Some(scheme)) {
                return None;
            }
        }

        let mut request = IppRequest::new(Op::CupsGetDevices);
        request.requesting_user(self.default_user());
        if let Some(timeout) = timeout.filter(|t| *t > 0) {
            request.add(GroupTag::Operation, "timeout", Value::Integer(timeout));
        }
        if let Some(limit) = limit.filter(|l| *l > 0) {
            request.add(GroupTag::Operation, "limit", Value::Integer(limit));
        }
        add_scheme_list(&mut request, "include-schemes", include_schemes);
        add_scheme_list(&mut request, "exclude-schemes", exclude_schemes);

        let reply = self.query(&request, Resource::Root).await?;

        let devices = reply
            .groups_of(GroupTag::Printer)
            .map(|group| DeviceRecord {
                class: group.string("device-class").map(str::to_string),
                id: group.string("device-id").map(str::to_string),
                info: group.string("device-info").map(str::to_string),
                make_and_model: group.string("device-make-and-model").map(str::to_string),
                uri: group.string("device-uri").map(str::to_string),
                location: group.string("device-location").map(str::to_string),
            })
            .filter(|d| d.uri.is_some())
            .collect();

        Some(devices)
    }
}

fn add_scheme_list(request: &mut IppRequest, name: &str, schemes: &[String]) {
    if schemes.is_empty() {
        return;
    }
    request.add_values(
        GroupTag::Operation,
        name,
        schemes.iter().map(|s| Value::Name(s.clone())).collect(),
    );
}

/// Extract top-level `Key value` directives, skipping comments and the
/// content of angle-bracket blocks.
fn parse_directives(content: &str) -> BTreeMap<String, String> {
    let mut settings = BTreeMap::new();
    let mut depth: u32 = 0;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with("</") {
            depth = depth.saturating_sub(1);
            continue;
        }
        if line.starts_with('<') {
            depth += 1;
            continue;
        }
        if depth > 0 {
            continue;
        }

        match line.split_once(char::is_whitespace) {
            Some((key, value)) => {
                settings.insert(key.to_string(), value.trim().to_string());
            }
            None => {
                settings.insert(line.to_string(), String::new());
            }
        }
    }

    settings
}

/// Rewrite the configuration with the given directives replacing their
/// top-level occurrences; directives that never appeared are appended.
/// Everything else, including comments and blocks, is kept verbatim.
fn merge_directives(content: &str, settings: &BTreeMap<String, String>) -> String {
    let mut seen: BTreeMap<&str, bool> = settings.keys().map(|k| (k.as_str(), false)).collect();
    let mut out = String::with_capacity(content.len());
    let mut depth: u32 = 0;

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("</") {
            depth = depth.saturating_sub(1);
        } else if trimmed.starts_with('<') {
            out.push_str(line);
            out.push('\n');
            depth += 1;
            continue;
        }

        if depth == 0 && !trimmed.is_empty() && !trimmed.starts_with('#') {
            let key = trimmed
                .split_once(char::is_whitespace)
                .map(|(k, _)| k)
                .unwrap_or(trimmed);
            if let Some((name, value)) = settings
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
            {
                // Replace only the first occurrence; later duplicates of a
                // rewritten directive are dropped so the result is
                // unambiguous.
                if let Some(done) = seen.get_mut(name.as_str()) {
                    if !*done {
                        out.push_str(&format!("{name} {value}\n"));
                        *done = true;
                    }
                }
                continue;
            }
        }

        out.push_str(line);
        out.push('\n');
    }

    for (name, value) in settings {
        if seen.get(name.as_str()) == Some(&false) {
            out.push_str(&format!("{name} {value}\n"));
        }
    }

    out
}
