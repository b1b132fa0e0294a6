//! Printer and class administration
//!
//! One method per administrative action. Everything validates its inputs
//! before a single byte reaches the wire, and the printer-or-class
//! operations go through the session's one-shot class fallback.

use crate::ipp::{printer_uri, GroupTag, IppRequest, Op, StatusCode, Value};
use crate::session::{QueueKind, Resource, Session};
use crate::transport::Channel;
use crate::validate::Role;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// printer-state value meaning "stopped"
const PRINTER_STATE_STOPPED: i32 = 5;

/// Snapshot of one queue as reported by the service listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    pub is_class: bool,
    pub device_uri: Option<String>,
    pub info: Option<String>,
    pub location: Option<String>,
    pub job_sheets: Vec<String>,
    pub accepting: bool,
    pub shared: bool,
    pub paused: bool,
    pub uri: Option<String>,
}

/// Members of a class, names and URIs index-aligned
#[derive(Debug, Clone, Default)]
pub struct ClassMembership {
    pub names: Vec<String>,
    pub uris: Vec<String>,
}

impl ClassMembership {
    pub fn position_of(&self, printer_name: &str) -> Option<usize> {
        self.names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(printer_name))
    }
}

impl<C: Channel> Session<C> {
    /// Create or modify a printer from a PPD known to the service database.
    ///
    /// More could be checked here (that the URI scheme is supported, that
    /// the PPD exists in the service database) but the service does all of
    /// that itself, and fetching the PPD list just to pre-check is slow.
    pub async fn printer_add(
        &mut self,
        name: &str,
        device_uri: &str,
        ppd: &str,
        info: Option<&str>,
        location: Option<&str>,
    ) -> bool {
        if !self.check(Role::PrinterName, Some(name))
            || !self.check(Role::PrinterUri, Some(device_uri))
            || !self.check(Role::Ppd, Some(ppd))
            || !self.check(Role::Info, info)
            || !self.check(Role::Location, location)
        {
            return false;
        }

        info!("adding printer {name} on {device_uri}");

        let mut request = self.queue_request(Op::CupsAddModifyPrinter, QueueKind::Printer, name);
        request.add(
            GroupTag::Printer,
            "printer-name",
            Value::Name(name.to_string()),
        );
        if !ppd.is_empty() {
            request.add(GroupTag::Printer, "ppd-name", Value::Name(ppd.to_string()));
        }
        if !device_uri.is_empty() {
            request.add(
                GroupTag::Printer,
                "device-uri",
                Value::Uri(device_uri.to_string()),
            );
        }
        add_optional_text(&mut request, "printer-info", info);
        add_optional_text(&mut request, "printer-location", location);

        self.send(&request, Resource::Admin).await
    }

    /// Create or modify a printer from a local PPD file posted with the
    /// request.
    pub async fn printer_add_with_ppd_file(
        &mut self,
        name: &str,
        device_uri: &str,
        ppd_filename: &str,
        info: Option<&str>,
        location: Option<&str>,
    ) -> bool {
        if !self.check(Role::PrinterName, Some(name))
            || !self.check(Role::PrinterUri, Some(device_uri))
            || !self.check(Role::PpdFilename, Some(ppd_filename))
            || !self.check(Role::Info, info)
            || !self.check(Role::Location, location)
        {
            return false;
        }

        let mut request = self.queue_request(Op::CupsAddModifyPrinter, QueueKind::Printer, name);
        request.add(
            GroupTag::Printer,
            "printer-name",
            Value::Name(name.to_string()),
        );

        // The URI may be empty here since the PPD is complete, and the
        // service rejects an empty device-uri string outright.
        if !device_uri.is_empty() {
            request.add(
                GroupTag::Printer,
                "device-uri",
                Value::Uri(device_uri.to_string()),
            );
        }
        add_optional_text(&mut request, "printer-info", info);
        add_optional_text(&mut request, "printer-location", location);

        let file = (!ppd_filename.is_empty()).then(|| Path::new(ppd_filename));
        self.post(&request, file, Resource::Admin).await
    }

    pub async fn printer_delete(&mut self, name: &str) -> bool {
        if !self.check(Role::PrinterName, Some(name)) {
            return false;
        }
        self.send_queue_op(
            Op::CupsDeletePrinter,
            QueueKind::Printer,
            name,
            Resource::Admin,
        )
        .await
    }

    pub async fn printer_set_default(&mut self, name: &str) -> bool {
        if !self.check(Role::PrinterName, Some(name)) {
            return false;
        }
        self.send_queue_op(
            Op::CupsSetDefault,
            QueueKind::Printer,
            name,
            Resource::Admin,
        )
        .await
    }

    pub async fn printer_set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        if !self.check(Role::PrinterName, Some(name)) {
            return false;
        }
        let op = if enabled {
            Op::ResumePrinter
        } else {
            Op::PausePrinter
        };
        self.send_queue_op(op, QueueKind::Printer, name, Resource::Admin)
            .await
    }

    pub async fn printer_set_uri(&mut self, name: &str, device_uri: &str) -> bool {
        if !self.check(Role::PrinterName, Some(name))
            || !self.check(Role::PrinterUri, Some(device_uri))
        {
            return false;
        }

        let mut request = self.queue_request(Op::CupsAddModifyPrinter, QueueKind::Printer, name);
        request.add(
            GroupTag::Printer,
            "device-uri",
            Value::Uri(device_uri.to_string()),
        );
        self.send(&request, Resource::Admin).await
    }

    /// `reason` is only meaningful when rejecting
    pub async fn printer_set_accept_jobs(
        &mut self,
        name: &str,
        accept: bool,
        reason: Option<&str>,
    ) -> bool {
        if !self.check(Role::PrinterName, Some(name)) || !self.check(Role::Reason, reason) {
            return false;
        }

        if accept {
            return self
                .send_queue_op(
                    Op::CupsAcceptJobs,
                    QueueKind::Printer,
                    name,
                    Resource::Admin,
                )
                .await;
        }

        let mut request = self.queue_request(Op::CupsRejectJobs, QueueKind::Printer, name);
        if let Some(reason) = reason.filter(|r| !r.is_empty()) {
            request.add(
                GroupTag::Operation,
                "printer-state-message",
                Value::Text(reason.to_string()),
            );
        }
        self.send(&request, Resource::Admin).await
    }

    /// Fetch a class's member list. `None` means the class does not exist
    /// or the query failed; an existing but empty class yields empty lists.
    pub async fn class_membership(&mut self, class_name: &str) -> Option<ClassMembership> {
        let mut request = self.queue_request(Op::GetPrinterAttributes, QueueKind::Class, class_name);
        request.requested_attributes(&["member-names", "member-uris"]);

        let reply = self.query(&request, Resource::Root).await?;
        let group = reply.group(GroupTag::Printer)?;

        Some(ClassMembership {
            names: group.strings("member-names"),
            uris: group.strings("member-uris"),
        })
    }

    /// A name is a class when its attributes carry a member list; a reply
    /// also comes back for plain printers, so the attribute presence is the
    /// only way to tell the two apart.
    pub async fn is_class(&mut self, name: &str) -> bool {
        if !self.check(Role::ClassName, Some(name)) {
            return false;
        }

        let mut request = self.queue_request(Op::GetPrinterAttributes, QueueKind::Class, name);
        request.requested_attributes(&["member-names"]);

        match self.query(&request, Resource::Root).await {
            Some(reply) => reply
                .groups_of(GroupTag::Printer)
                .any(|g| g.find("member-names").is_some()),
            None => false,
        }
    }

    pub async fn class_add_printer(&mut self, class_name: &str, printer_name: &str) -> bool {
        if !self.check(Role::ClassName, Some(class_name))
            || !self.check(Role::PrinterName, Some(printer_name))
        {
            return false;
        }

        let membership = self.class_membership(class_name).await.unwrap_or_default();
        if membership.position_of(printer_name).is_some() {
            self.set_internal_status(Some(format!(
                "Printer {printer_name} is already in class {class_name}."
            )));
            return false;
        }

        let mut uris: Vec<Value> = membership
            .uris
            .iter()
            .map(|u| Value::Uri(u.clone()))
            .collect();
        uris.push(Value::Uri(printer_uri(printer_name)));

        let mut request = self.queue_request(Op::CupsAddModifyClass, QueueKind::Class, class_name);
        request.add_values(GroupTag::Printer, "member-uris", uris);

        self.send(&request, Resource::Admin).await
    }

    pub async fn class_delete_printer(&mut self, class_name: &str, printer_name: &str) -> bool {
        if !self.check(Role::ClassName, Some(class_name))
            || !self.check(Role::PrinterName, Some(printer_name))
        {
            return false;
        }

        let membership = match self.class_membership(class_name).await {
            Some(m) => m,
            None => return false,
        };
        let position = match membership.position_of(printer_name) {
            Some(p) => p,
            None => {
                self.set_internal_status(Some(format!(
                    "Printer {printer_name} is not in class {class_name}."
                )));
                return false;
            }
        };

        // Removing the last member removes the class.
        if membership.uris.len() <= 1 {
            return self.class_delete(class_name).await;
        }

        let uris: Vec<Value> = membership
            .uris
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != position)
            .map(|(_, u)| Value::Uri(u.clone()))
            .collect();

        let mut request = self.queue_request(Op::CupsAddModifyClass, QueueKind::Class, class_name);
        request.add_values(GroupTag::Printer, "member-uris", uris);

        self.send(&request, Resource::Admin).await
    }

    pub async fn class_delete(&mut self, class_name: &str) -> bool {
        if !self.check(Role::ClassName, Some(class_name)) {
            return false;
        }
        self.send_queue_op(
            Op::CupsDeleteClass,
            QueueKind::Class,
            class_name,
            Resource::Admin,
        )
        .await
    }

    pub async fn queue_set_info(&mut self, name: &str, info: &str) -> bool {
        if !self.check(Role::PrinterName, Some(name)) || !self.check(Role::Info, Some(info)) {
            return false;
        }
        let info = info.to_string();
        self.modify_queue(name, move |request| {
            request.add(
                GroupTag::Printer,
                "printer-info",
                Value::Text(info.clone()),
            );
        })
        .await
    }

    pub async fn queue_set_location(&mut self, name: &str, location: &str) -> bool {
        if !self.check(Role::PrinterName, Some(name))
            || !self.check(Role::Location, Some(location))
        {
            return false;
        }
        let location = location.to_string();
        self.modify_queue(name, move |request| {
            request.add(
                GroupTag::Printer,
                "printer-location",
                Value::Text(location.clone()),
            );
        })
        .await
    }

    pub async fn queue_set_shared(&mut self, name: &str, shared: bool) -> bool {
        if !self.check(Role::PrinterName, Some(name)) {
            return false;
        }
        self.modify_queue(name, move |request| {
            request.add(
                GroupTag::Operation,
                "printer-is-shared",
                Value::Boolean(shared),
            );
        })
        .await
    }

    pub async fn queue_set_job_sheets(&mut self, name: &str, start: &str, end: &str) -> bool {
        if !self.check(Role::PrinterName, Some(name))
            || !self.check(Role::JobSheet, Some(start))
            || !self.check(Role::JobSheet, Some(end))
        {
            return false;
        }
        let start = start.to_string();
        let end = end.to_string();
        self.modify_queue(name, move |request| {
            request.add_values(
                GroupTag::Printer,
                "job-sheets-default",
                vec![Value::Name(start.clone()), Value::Name(end.clone())],
            );
        })
        .await
    }

    pub async fn queue_set_error_policy(&mut self, name: &str, policy: &str) -> bool {
        if !self.check(Role::PrinterName, Some(name))
            || !self.check(Role::ErrorPolicy, Some(policy))
        {
            return false;
        }
        let policy = policy.to_string();
        self.modify_queue(name, move |request| {
            request.add(
                GroupTag::Printer,
                "printer-error-policy",
                Value::Name(policy.clone()),
            );
        })
        .await
    }

    pub async fn queue_set_op_policy(&mut self, name: &str, policy: &str) -> bool {
        if !self.check(Role::PrinterName, Some(name)) || !self.check(Role::OpPolicy, Some(policy))
        {
            return false;
        }
        let policy = policy.to_string();
        self.modify_queue(name, move |request| {
            request.add(
                GroupTag::Printer,
                "printer-op-policy",
                Value::Name(policy.clone()),
            );
        })
        .await
    }

    /// Empty list (or None) allows everyone
    pub async fn queue_set_users_allowed(&mut self, name: &str, users: &[String]) -> bool {
        self.queue_set_users(name, users, "requesting-user-name-allowed", "all")
            .await
    }

    /// Empty list (or None) denies no one
    pub async fn queue_set_users_denied(&mut self, name: &str, users: &[String]) -> bool {
        self.queue_set_users(name, users, "requesting-user-name-denied", "none")
            .await
    }

    async fn queue_set_users(
        &mut self,
        name: &str,
        users: &[String],
        attribute: &str,
        default_value: &str,
    ) -> bool {
        if !self.check(Role::PrinterName, Some(name)) {
            return false;
        }
        for user in users {
            if !self.check(Role::User, Some(user)) {
                return false;
            }
        }

        // Blank entries come from legacy configurations; skip them rather
        // than reject the whole list.
        let kept: Vec<Value> = users
            .iter()
            .filter(|u| !u.is_empty())
            .map(|u| Value::Name(u.clone()))
            .collect();
        let values = if kept.is_empty() {
            vec![Value::Name(default_value.to_string())]
        } else {
            kept
        };

        let attribute = attribute.to_string();
        self.modify_queue(name, move |request| {
            request.add_values(GroupTag::Printer, &attribute, values.clone());
        })
        .await
    }

    /// Set (or, with no values, delete) the default for an option
    pub async fn queue_set_option_default(
        &mut self,
        name: &str,
        option: &str,
        values: &[String],
    ) -> bool {
        if !self.check(Role::PrinterName, Some(name))
            || !self.check(Role::OptionName, Some(option))
        {
            return false;
        }
        for value in values {
            if !self.check(Role::OptionValue, Some(value)) {
                return false;
            }
        }

        let option_name = format!("{option}-default");

        if values.is_empty() {
            return self
                .modify_queue(name, move |request| {
                    request.add(GroupTag::Printer, &option_name, Value::DeleteAttr);
                })
                .await;
        }

        // Setting needs the right request kind up front, so probe.
        let kind = if self.is_class(name).await {
            QueueKind::Class
        } else {
            QueueKind::Printer
        };
        let op = match kind {
            QueueKind::Printer => Op::CupsAddModifyPrinter,
            QueueKind::Class => Op::CupsAddModifyClass,
        };

        let mut request = self.queue_request(op, kind, name);
        request.add_values(
            GroupTag::Printer,
            &option_name,
            values.iter().map(|v| Value::Name(v.clone())).collect(),
        );

        self.send(&request, Resource::Admin).await
    }

    /// Set an option on a queue. For a single value on a plain printer the
    /// PPD default is rewritten too, because some applications read the PPD
    /// content instead of the queue attributes.
    pub async fn queue_set_option(
        &mut self,
        name: &str,
        option: &str,
        values: &[String],
    ) -> bool {
        if !self.check(Role::PrinterName, Some(name))
            || !self.check(Role::OptionName, Some(option))
        {
            return false;
        }
        for value in values {
            if !self.check(Role::OptionValue, Some(value)) {
                return false;
            }
        }
        if values.is_empty() {
            self.set_internal_status(Some(format!("No value for option {option}.")));
            return false;
        }

        let is_class = self.is_class(name).await;

        let rewritten_ppd = if !is_class && values.len() == 1 {
            self.rewrite_ppd_default(name, option, &values[0]).await
        } else {
            None
        };

        let kind = if is_class {
            QueueKind::Class
        } else {
            QueueKind::Printer
        };
        let op = match kind {
            QueueKind::Printer => Op::CupsAddModifyPrinter,
            QueueKind::Class => Op::CupsAddModifyClass,
        };

        let mut request = self.queue_request(op, kind, name);
        request.add_values(
            GroupTag::Printer,
            option,
            values.iter().map(|v| Value::Name(v.clone())).collect(),
        );

        match &rewritten_ppd {
            Some(temp) => self.post(&request, Some(temp.path()), Resource::Admin).await,
            None => self.send(&request, Resource::Admin).await,
        }
    }

    /// Download the queue's PPD and rewrite its `*Default` line for the
    /// option. `None` when the queue has no PPD or nothing changed.
    async fn rewrite_ppd_default(
        &mut self,
        name: &str,
        option: &str,
        value: &str,
    ) -> Option<tempfile::NamedTempFile> {
        let resource = format!("/printers/{name}.ppd");
        let (status, content) = self.fetch(&resource).await?;
        if status != 200 {
            return None;
        }

        let content = String::from_utf8(content).ok()?;
        let rewritten = rewrite_ppd_defaults(&content, option, value)?;

        let temp = tempfile::NamedTempFile::new().ok()?;
        std::fs::write(temp.path(), rewritten).ok()?;
        Some(temp)
    }

    /// Device URI of a printer, when it has one
    pub async fn printer_get_uri(&mut self, name: &str) -> Option<String> {
        if !self.check(Role::PrinterName, Some(name)) {
            return None;
        }

        let mut request = self.queue_request(Op::GetPrinterAttributes, QueueKind::Printer, name);
        request.requested_attributes(&["device-uri"]);

        let reply = self.query(&request, Resource::Root).await?;
        reply
            .string(GroupTag::Printer, "device-uri")
            .map(str::to_string)
    }

    /// Whether a printer is attached locally. A queue with no URI (a class,
    /// or a missing printer) counts as local.
    pub async fn is_printer_local(&mut self, name: &str) -> bool {
        if !self.check(Role::PrinterName, Some(name)) {
            return false;
        }
        match self.printer_get_uri(name).await {
            Some(uri) => is_printer_uri_local(&uri),
            None => true,
        }
    }

    /// Everything the service reports about existing queues, printers first
    /// then classes. A "nothing found" rejection from either listing is an
    /// empty listing, not a failure.
    pub async fn list_destinations(&mut self) -> Option<Vec<Destination>> {
        const ATTRS: [&str; 9] = [
            "printer-name",
            "device-uri",
            "printer-info",
            "printer-location",
            "printer-is-accepting-jobs",
            "printer-is-shared",
            "printer-state",
            "printer-uri-supported",
            "job-sheets-default",
        ];

        let mut destinations = Vec::new();

        for (op, is_class) in [(Op::CupsGetPrinters, false), (Op::CupsGetClasses, true)] {
            let mut request = IppRequest::new(op);
            request.requesting_user(self.default_user());
            request.requested_attributes(&ATTRS);

            match self.query(&request, Resource::Root).await {
                Some(reply) => {
                    for group in reply.groups_of(GroupTag::Printer) {
                        let name = match group.string("printer-name") {
                            Some(n) => n.to_string(),
                            None => continue,
                        };
                        destinations.push(Destination {
                            name,
                            is_class,
                            device_uri: group.string("device-uri").map(str::to_string),
                            info: group.string("printer-info").map(str::to_string),
                            location: group.string("printer-location").map(str::to_string),
                            job_sheets: group.strings("job-sheets-default"),
                            accepting: group
                                .boolean("printer-is-accepting-jobs")
                                .unwrap_or(false),
                            shared: group.boolean("printer-is-shared").unwrap_or(false),
                            paused: group.integer("printer-state")
                                == Some(PRINTER_STATE_STOPPED),
                            uri: group.string("printer-uri-supported").map(str::to_string),
                        });
                    }
                }
                None if self.last_status() == StatusCode::NOT_FOUND => {}
                None => return None,
            }
        }

        Some(destinations)
    }

    /// Name of the default destination, if one is set
    pub async fn default_destination(&mut self) -> Option<String> {
        let mut request = IppRequest::new(Op::CupsGetDefault);
        request.requesting_user(self.default_user());
        request.requested_attributes(&["printer-name"]);

        let reply = self.query(&request, Resource::Root).await?;
        reply
            .string(GroupTag::Printer, "printer-name")
            .map(str::to_string)
    }
}

fn add_optional_text(request: &mut IppRequest, name: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        request.add(GroupTag::Printer, name, Value::Text(value.to_string()));
    }
}

/// Classify a device URI as local or remote by scheme.
pub fn is_printer_uri_local(uri: &str) -> bool {
    // An empty URI can only be local.
    if uri.is_empty() {
        return true;
    }

    let lower = uri.to_ascii_lowercase();

    // beh is the backend error handler wrapper.
    const LOCAL: [&str; 8] = [
        "parallel:", "usb:", "hal:", "beh:", "scsi:", "serial:", "file:", "pipe:",
    ];
    if LOCAL.iter().any(|p| lower.starts_with(p)) {
        return true;
    }

    const REMOTE: [&str; 6] = ["socket:", "ipp:", "http:", "lpd:", "smb:", "novell:"];
    if REMOTE.iter().any(|p| lower.starts_with(p)) {
        return false;
    }

    // hplip backends can be either; a URI with an ip= argument is remote.
    if lower.starts_with("hp:") || lower.starts_with("hpfax:") {
        if let Some(query) = lower.split_once('?').map(|(_, q)| q) {
            return !query.split('&').any(|arg| arg.starts_with("ip="));
        }
        return true;
    }

    // Unknown scheme: assume remote.
    false
}

/// Rewrite `*Default<Keyword>:` lines in PPD content for the given option.
/// The page-size family moves together: changing any of PageRegion,
/// PageSize, PaperDimension or ImageableArea updates all their defaults.
pub fn rewrite_ppd_defaults(content: &str, option: &str, value: &str) -> Option<String> {
    const PAGE_FAMILY: [&str; 4] = ["PageRegion", "PageSize", "PaperDimension", "ImageableArea"];

    let option_is_page = PAGE_FAMILY.iter().any(|k| k.eq_ignore_ascii_case(option));
    let mut changed = false;
    let mut out = String::with_capacity(content.len());

    for line in content.lines() {
        let rewritten = line.strip_prefix("*Default").and_then(|rest| {
            let keyword_end = rest.find(|c: char| c == ':' || c.is_whitespace())?;
            let keyword = &rest[..keyword_end];
            let current = rest[keyword_end..].trim_start_matches(':').trim();

            let matches = keyword.eq_ignore_ascii_case(option)
                || (option_is_page && PAGE_FAMILY.iter().any(|k| k.eq_ignore_ascii_case(keyword)));

            if matches && current != value {
                Some(format!("*Default{keyword}: {value}"))
            } else {
                None
            }
        });

        match rewritten {
            Some(new_line) => {
                changed = true;
                out.push_str(&new_line);
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }

    changed.then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipp::{Attribute, Group};
    use crate::transport::testing::{reply, reply_with, ScriptedChannel};

    fn member_reply(names: &[&str]) -> crate::ipp::IppResponse {
        let group = Group {
            tag: GroupTag::Printer,
            attributes: vec![
                Attribute {
                    name: "member-names".into(),
                    values: names.iter().map(|n| Value::Name((*n).into())).collect(),
                },
                Attribute {
                    name: "member-uris".into(),
                    values: names
                        .iter()
                        .map(|n| Value::Uri(printer_uri(n)))
                        .collect(),
                },
            ],
        };
        reply_with(StatusCode::OK, vec![group])
    }

    #[tokio::test]
    async fn test_invalid_name_never_reaches_the_wire() {
        let mut session = Session::new(ScriptedChannel::default(), "root");
        assert!(!session.printer_delete("Office Printer").await);
        assert_eq!(session.channel_for_tests().sent.len(), 0);
        assert_eq!(
            session.last_status_string(),
            "\"Office Printer\" is not a valid printer name."
        );
    }

    #[tokio::test]
    async fn test_class_add_printer_appends_member() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(member_reply(&["existing"])));
        channel.push_reply(Ok(reply(StatusCode::OK)));
        let mut session = Session::new(channel, "root");

        assert!(session.class_add_printer("staff", "new-printer").await);

        let sent = &session.channel_for_tests().sent;
        assert_eq!(sent.len(), 2);
        let modify = &sent[1].1;
        assert_eq!(modify.op, Op::CupsAddModifyClass);
        let decoded = crate::ipp::IppResponse::decode(&modify.encode()).unwrap();
        let uris = decoded
            .group(GroupTag::Printer)
            .unwrap()
            .strings("member-uris");
        assert_eq!(
            uris,
            vec![printer_uri("existing"), printer_uri("new-printer")]
        );
    }

    #[tokio::test]
    async fn test_class_add_printer_rejects_duplicate() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(member_reply(&["already"])));
        let mut session = Session::new(channel, "root");

        assert!(!session.class_add_printer("staff", "already").await);
        assert_eq!(
            session.last_status_string(),
            "Printer already is already in class staff."
        );
        // only the membership probe went out
        assert_eq!(session.channel_for_tests().sent.len(), 1);
    }

    #[tokio::test]
    async fn test_removing_last_member_deletes_class() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(member_reply(&["only"])));
        channel.push_reply(Ok(reply(StatusCode::OK)));
        let mut session = Session::new(channel, "root");

        assert!(session.class_delete_printer("staff", "only").await);
        let sent = &session.channel_for_tests().sent;
        assert_eq!(sent[1].1.op, Op::CupsDeleteClass);
    }

    #[tokio::test]
    async fn test_accept_jobs_reason_only_when_rejecting() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply(StatusCode::OK)));
        let mut session = Session::new(channel, "root");

        assert!(
            session
                .printer_set_accept_jobs("office", false, Some("toner change"))
                .await
        );
        let request = &session.channel_for_tests().sent[0].1;
        assert_eq!(request.op, Op::CupsRejectJobs);
        let decoded = crate::ipp::IppResponse::decode(&request.encode()).unwrap();
        assert_eq!(
            decoded.string(GroupTag::Operation, "printer-state-message"),
            Some("toner change")
        );
    }

    #[tokio::test]
    async fn test_users_denied_filters_blank_entries() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply(StatusCode::OK)));
        let mut session = Session::new(channel, "root");

        let users = vec!["".to_string(), "mallory".to_string(), "".to_string()];
        assert!(session.queue_set_users_denied("office", &users).await);

        let request = &session.channel_for_tests().sent[0].1;
        let decoded = crate::ipp::IppResponse::decode(&request.encode()).unwrap();
        assert_eq!(
            decoded
                .group(GroupTag::Printer)
                .unwrap()
                .strings("requesting-user-name-denied"),
            vec!["mallory".to_string()]
        );
    }

    #[tokio::test]
    async fn test_users_allowed_empty_means_all() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply(StatusCode::OK)));
        let mut session = Session::new(channel, "root");

        assert!(session.queue_set_users_allowed("office", &[]).await);

        let request = &session.channel_for_tests().sent[0].1;
        let decoded = crate::ipp::IppResponse::decode(&request.encode()).unwrap();
        assert_eq!(
            decoded
                .group(GroupTag::Printer)
                .unwrap()
                .strings("requesting-user-name-allowed"),
            vec!["all".to_string()]
        );
    }

    #[test]
    fn test_uri_locality() {
        assert!(is_printer_uri_local(""));
        assert!(is_printer_uri_local("usb://Canon/MF240"));
        assert!(is_printer_uri_local("Parallel:/dev/lp0"));
        assert!(!is_printer_uri_local("ipp://host/printers/a"));
        assert!(!is_printer_uri_local("socket://10.0.0.2:9100"));
        assert!(is_printer_uri_local("hp:/usb/DeskJet?serial=1"));
        assert!(!is_printer_uri_local("hp:/net/foo?ip=10.0.0.9"));
        assert!(!is_printer_uri_local("weird://whatever"));
    }

    #[test]
    fn test_ppd_default_rewrite() {
        let ppd = "*PPD-Adobe: \"4.3\"\n*DefaultResolution: 600dpi\n*DefaultPageSize: A4\n";
        let out = rewrite_ppd_defaults(ppd, "Resolution", "1200dpi").unwrap();
        assert!(out.contains("*DefaultResolution: 1200dpi"));
        assert!(out.contains("*DefaultPageSize: A4"));

        // unchanged value: no rewrite needed
        assert!(rewrite_ppd_defaults(ppd, "Resolution", "600dpi").is_none());
    }

    #[test]
    fn test_ppd_page_family_moves_together() {
        let ppd = "*DefaultPageSize: A4\n*DefaultPageRegion: A4\n*DefaultImageableArea: A4\n";
        let out = rewrite_ppd_defaults(ppd, "PageSize", "Letter").unwrap();
        assert!(out.contains("*DefaultPageSize: Letter"));
        assert!(out.contains("*DefaultPageRegion: Letter"));
        assert!(out.contains("*DefaultImageableArea: Letter"));
    }
}
