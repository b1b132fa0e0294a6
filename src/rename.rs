//! Queue renaming
//!
//! The print protocol has no rename operation, so a rename is a small saga:
//! snapshot the source queue, stop it from accepting new work, recreate it
//! under the new name, carry the jobs and class memberships over, then
//! delete the source. If recreation fails the source is restored and
//! nothing else is touched; a failure later leaves both queues in place so
//! the caller can retry without losing anything.

use crate::ipp::{GroupTag, Op, Value};
use crate::jobs::JobState;
use crate::printer::ClassMembership;
use crate::session::{QueueKind, Resource, Session};
use crate::transport::Channel;
use crate::validate::Role;
use tracing::{info, warn};

const PRINTER_STATE_STOPPED: i32 = 5;

/// Everything about the source queue that must survive the rename
#[derive(Debug, Default)]
struct QueueSnapshot {
    info: Option<String>,
    location: Option<String>,
    device_uri: Option<String>,
    shared: Option<bool>,
    accepting: bool,
    paused: bool,
    was_default: bool,
    job_sheets: Vec<String>,
    error_policy: Option<String>,
    op_policy: Option<String>,
    users_allowed: Vec<String>,
    users_denied: Vec<String>,
    /// Non-empty when the source is a class
    members: Vec<String>,
}

impl<C: Channel> Session<C> {
    /// Rename a printer or class.
    pub async fn queue_rename(&mut self, old_name: &str, new_name: &str) -> bool {
        if !self.check(Role::PrinterName, Some(old_name))
            || !self.check(Role::PrinterName, Some(new_name))
        {
            return false;
        }

        // Preconditions, all read-only: both names resolve the right way
        // and nothing is printing from the source right now.
        let destinations = match self.list_destinations().await {
            Some(d) => d,
            None => return false,
        };
        if destinations
            .iter()
            .any(|d| d.name.eq_ignore_ascii_case(new_name))
        {
            self.set_internal_status(Some(format!("Printer {new_name} already exists.")));
            return false;
        }
        if !destinations
            .iter()
            .any(|d| d.name.eq_ignore_ascii_case(old_name))
        {
            self.set_internal_status(Some(format!("Printer {old_name} does not exist.")));
            return false;
        }

        let jobs = match self.get_jobs(old_name).await {
            Some(jobs) => jobs,
            None => return false,
        };
        if jobs
            .iter()
            .any(|j| matches!(j.state, Some(JobState::Pending | JobState::Processing)))
        {
            self.set_internal_status(Some(format!("Printer {old_name} still has active jobs.")));
            return false;
        }

        // The default flag is only reported by the separate get-default
        // query, not by the attribute fetch below.
        let was_default = match self.default_destination().await {
            Some(current) => current.eq_ignore_ascii_case(old_name),
            None => {
                // No configured default; keep the lookup from shadowing
                // the saga's own status.
                self.set_internal_status(None);
                false
            }
        };

        let mut snapshot = match self.snapshot_queue(old_name).await {
            Some(s) => s,
            None => return false,
        };
        snapshot.was_default = was_default;

        // The PPD may be missing (raw queues, classes); that is not fatal.
        let ppd = self.download_ppd(old_name).await;

        info!("renaming queue {old_name} to {new_name}");

        // From here on the source stops taking new jobs. Every failure path
        // below must undo this before giving up.
        if !self
            .printer_set_accept_jobs(old_name, false, Some("Queue is being renamed"))
            .await
        {
            return false;
        }

        if !self.recreate_queue(new_name, &snapshot, ppd.as_ref()).await {
            let creation_error = self.last_status_string();
            if !self.printer_set_accept_jobs(old_name, true, None).await {
                warn!("could not restore accept-jobs on {old_name} after failed rename");
            }
            self.set_internal_status(Some(creation_error));
            return false;
        }

        self.apply_snapshot(new_name, &snapshot).await;

        // Carry the held jobs over; pending and processing jobs were ruled
        // out above and anything else is terminal on the source. A job that
        // refuses to move is left where it is; the source deletion below
        // will then fail and leave both queues for the caller to sort out.
        for job in jobs.iter().filter(|j| j.state == Some(JobState::Held)) {
            if !self.job_move(job.id, new_name).await {
                warn!("job {} did not move to {new_name}", job.id);
            }
        }

        self.rewrite_class_memberships(old_name, new_name, &destinations)
            .await;

        let deleted = if snapshot.members.is_empty() {
            self.printer_delete(old_name).await
        } else {
            self.class_delete(old_name).await
        };
        if !deleted {
            self.set_internal_status(Some(format!(
                "Printer {new_name} was created but {old_name} could not be removed."
            )));
            return false;
        }

        true
    }

    async fn snapshot_queue(&mut self, name: &str) -> Option<QueueSnapshot> {
        let mut request = self.queue_request(Op::GetPrinterAttributes, QueueKind::Printer, name);
        request.requested_attributes(&[
            "printer-info",
            "printer-location",
            "device-uri",
            "printer-is-shared",
            "printer-is-accepting-jobs",
            "printer-state",
            "job-sheets-default",
            "printer-error-policy",
            "printer-op-policy",
            "requesting-user-name-allowed",
            "requesting-user-name-denied",
            "member-names",
        ]);

        let reply = self.query(&request, Resource::Root).await?;
        let group = reply.group(GroupTag::Printer)?;

        Some(QueueSnapshot {
            info: group.string("printer-info").map(str::to_string),
            location: group.string("printer-location").map(str::to_string),
            device_uri: group.string("device-uri").map(str::to_string),
            shared: group.boolean("printer-is-shared"),
            accepting: group.boolean("printer-is-accepting-jobs").unwrap_or(true),
            paused: group.integer("printer-state") == Some(PRINTER_STATE_STOPPED),
            job_sheets: group.strings("job-sheets-default"),
            error_policy: group.string("printer-error-policy").map(str::to_string),
            op_policy: group.string("printer-op-policy").map(str::to_string),
            users_allowed: group.strings("requesting-user-name-allowed"),
            users_denied: group.strings("requesting-user-name-denied"),
            members: group.strings("member-names"),
            was_default: false,
        })
    }

    /// The current PPD content, when the queue has one
    async fn download_ppd(&mut self, name: &str) -> Option<Vec<u8>> {
        let resource = format!("/printers/{name}.ppd");
        match self.fetch(&resource).await {
            Some((200, body)) if !body.is_empty() => Some(body),
            _ => {
                // A queue without a PPD is legitimate; clear the stale
                // transfer error so it cannot shadow a later failure.
                self.set_internal_status(None);
                None
            }
        }
    }

    async fn recreate_queue(
        &mut self,
        new_name: &str,
        snapshot: &QueueSnapshot,
        ppd: Option<&Vec<u8>>,
    ) -> bool {
        if !snapshot.members.is_empty() {
            // Class: recreate with the same membership.
            let mut created = true;
            for member in &snapshot.members {
                if !self.class_add_printer(new_name, member).await {
                    created = false;
                    break;
                }
            }
            return created;
        }

        let device_uri = snapshot.device_uri.as_deref().unwrap_or("");

        match ppd {
            Some(content) => {
                let temp = match write_temp_ppd(content) {
                    Ok(temp) => temp,
                    Err(e) => {
                        self.set_internal_status(Some(format!("Cannot stage PPD copy: {e}")));
                        return false;
                    }
                };
                let path = temp.path().to_string_lossy().into_owned();
                self.printer_add_with_ppd_file(
                    new_name,
                    device_uri,
                    &path,
                    snapshot.info.as_deref(),
                    snapshot.location.as_deref(),
                )
                .await
            }
            None => {
                self.printer_add(
                    new_name,
                    device_uri,
                    "",
                    snapshot.info.as_deref(),
                    snapshot.location.as_deref(),
                )
                .await
            }
        }
    }

    /// Re-apply the remaining source settings to the new queue. These are
    /// individually non-fatal: the queue exists and prints, a lost setting
    /// can be set again.
    async fn apply_snapshot(&mut self, name: &str, snapshot: &QueueSnapshot) {
        if let Some(shared) = snapshot.shared {
            self.queue_set_shared(name, shared).await;
        }
        if snapshot.job_sheets.len() == 2 {
            let (start, end) = (snapshot.job_sheets[0].clone(), snapshot.job_sheets[1].clone());
            self.queue_set_job_sheets(name, &start, &end).await;
        }
        if let Some(policy) = snapshot.error_policy.clone() {
            self.queue_set_error_policy(name, &policy).await;
        }
        if let Some(policy) = snapshot.op_policy.clone() {
            self.queue_set_op_policy(name, &policy).await;
        }
        if !snapshot.users_allowed.is_empty() {
            let users = snapshot.users_allowed.clone();
            self.queue_set_users_allowed(name, &users).await;
        }
        if !snapshot.users_denied.is_empty() {
            let users = snapshot.users_denied.clone();
            self.queue_set_users_denied(name, &users).await;
        }

        self.printer_set_enabled(name, !snapshot.paused).await;
        self.printer_set_accept_jobs(name, snapshot.accepting, None)
            .await;
        if snapshot.was_default {
            self.printer_set_default(name).await;
        }
    }

    /// Every class that listed the old printer gets its membership rewritten
    /// to point at the new one.
    async fn rewrite_class_memberships(
        &mut self,
        old_name: &str,
        new_name: &str,
        destinations: &[crate::printer::Destination],
    ) {
        let classes: Vec<String> = destinations
            .iter()
            .filter(|d| d.is_class)
            .map(|d| d.name.clone())
            .collect();

        for class_name in classes {
            let membership = match self.class_membership(&class_name).await {
                Some(m) => m,
                None => continue,
            };
            if membership.position_of(old_name).is_none() {
                continue;
            }
            self.replace_class_member(&class_name, &membership, old_name, new_name)
                .await;
        }
    }

    async fn replace_class_member(
        &mut self,
        class_name: &str,
        membership: &ClassMembership,
        old_name: &str,
        new_name: &str,
    ) -> bool {
        let uris: Vec<Value> = membership
            .names
            .iter()
            .zip(&membership.uris)
            .map(|(name, uri)| {
                if name.eq_ignore_ascii_case(old_name) {
                    Value::Uri(crate::ipp::printer_uri(new_name))
                } else {
                    Value::Uri(uri.clone())
                }
            })
            .collect();

        let mut request = self.queue_request(Op::CupsAddModifyClass, QueueKind::Class, class_name);
        request.add_values(GroupTag::Printer, "member-uris", uris);
        self.send(&request, Resource::Admin).await
    }
}

fn write_temp_ppd(content: &[u8]) -> std::io::Result<tempfile::NamedTempFile> {
    let temp = tempfile::NamedTempFile::new()?;
    std::fs::write(temp.path(), content)?;
    Ok(temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipp::{Attribute, Group, IppResponse, StatusCode};
    use crate::transport::testing::{reply, reply_with, ScriptedChannel};

    fn printer_group(name: &str, extra: Vec<Attribute>) -> Group {
        let mut attributes = vec![Attribute {
            name: "printer-name".into(),
            values: vec![Value::Name(name.into())],
        }];
        attributes.extend(extra);
        Group {
            tag: GroupTag::Printer,
            attributes,
        }
    }

    fn listing(names: &[&str]) -> IppResponse {
        reply_with(
            StatusCode::OK,
            names
                .iter()
                .map(|n| printer_group(n, Vec::new()))
                .collect(),
        )
    }

    fn job_listing(states: &[i32]) -> IppResponse {
        let groups = states
            .iter()
            .enumerate()
            .map(|(i, state)| Group {
                tag: GroupTag::Job,
                attributes: vec![
                    Attribute {
                        name: "job-id".into(),
                        values: vec![Value::Integer(i as i32 + 1)],
                    },
                    Attribute {
                        name: "job-state".into(),
                        values: vec![Value::Enum(*state)],
                    },
                ],
            })
            .collect();
        reply_with(StatusCode::OK, groups)
    }

    #[tokio::test]
    async fn test_rename_refuses_existing_destination() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(listing(&["old", "new"])));
        channel.push_reply(Ok(listing(&[])));
        let mut session = Session::new(channel, "root");

        assert!(!session.queue_rename("old", "new").await);
        assert_eq!(
            session.last_status_string(),
            "Printer new already exists."
        );
        // only the two read-only listings went out
        assert_eq!(session.channel_for_tests().sent.len(), 2);
    }

    #[tokio::test]
    async fn test_rename_refuses_missing_source() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(listing(&["other"])));
        channel.push_reply(Ok(listing(&[])));
        let mut session = Session::new(channel, "root");

        assert!(!session.queue_rename("old", "new").await);
        assert_eq!(
            session.last_status_string(),
            "Printer old does not exist."
        );
    }

    #[tokio::test]
    async fn test_rename_refuses_while_printing_without_mutation() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(listing(&["old"])));
        channel.push_reply(Ok(listing(&[])));
        channel.push_reply(Ok(job_listing(&[5])));
        let mut session = Session::new(channel, "root");

        assert!(!session.queue_rename("old", "new").await);
        assert_eq!(
            session.last_status_string(),
            "Printer old still has active jobs."
        );
        // printers, classes, jobs: three queries, zero modifications
        assert_eq!(session.channel_for_tests().sent.len(), 3);
    }

    #[tokio::test]
    async fn test_rename_refuses_pending_job_without_mutation() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(listing(&["old"])));
        channel.push_reply(Ok(listing(&[])));
        channel.push_reply(Ok(job_listing(&[3])));
        let mut session = Session::new(channel, "root");

        assert!(!session.queue_rename("old", "new").await);
        assert_eq!(
            session.last_status_string(),
            "Printer old still has active jobs."
        );
        assert_eq!(session.channel_for_tests().sent.len(), 3);
        assert!(session
            .channel_for_tests()
            .sent
            .iter()
            .all(|(_, r)| matches!(
                r.op,
                Op::CupsGetPrinters | Op::CupsGetClasses | Op::GetJobs
            )));
    }

    #[tokio::test]
    async fn test_failed_recreation_restores_source() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(listing(&["old"]))); // printers
        channel.push_reply(Ok(listing(&[]))); // classes
        channel.push_reply(Ok(job_listing(&[]))); // jobs
        channel.push_reply(Ok(listing(&["other"]))); // default destination
        channel.push_reply(Ok(reply_with(
            StatusCode::OK,
            vec![printer_group("old", Vec::new())],
        ))); // snapshot
        channel.fetches.push_back(Ok((404, Vec::new()))); // no ppd
        channel.push_reply(Ok(reply(StatusCode::OK))); // reject-jobs on old
        channel.push_reply(Ok(reply(StatusCode::FORBIDDEN))); // create fails
        channel.push_reply(Ok(reply(StatusCode::OK))); // accept-jobs restored
        let mut session = Session::new(channel, "root");

        assert!(!session.queue_rename("old", "new").await);

        let sent = &session.channel_for_tests().sent;
        let last = &sent[sent.len() - 1].1;
        assert_eq!(last.op, Op::CupsAcceptJobs);
        assert_eq!(
            session.last_status_string(),
            "client-error-forbidden"
        );
    }

    #[tokio::test]
    async fn test_rename_moves_jobs_and_deletes_source() {
        let snapshot_attrs = vec![
            Attribute {
                name: "device-uri".into(),
                values: vec![Value::Uri("usb://X/Y".into())],
            },
            Attribute {
                name: "printer-is-accepting-jobs".into(),
                values: vec![Value::Boolean(true)],
            },
        ];

        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(listing(&["old"]))); // printers
        channel.push_reply(Ok(listing(&[]))); // classes
        channel.push_reply(Ok(job_listing(&[4, 6]))); // one held, one stopped
        channel.push_reply(Ok(listing(&[]))); // no default destination
        channel.push_reply(Ok(reply_with(
            StatusCode::OK,
            vec![printer_group("old", snapshot_attrs)],
        ))); // snapshot
        channel.fetches.push_back(Ok((404, Vec::new()))); // no ppd
        channel.push_reply(Ok(reply(StatusCode::OK))); // reject-jobs old
        channel.push_reply(Ok(reply(StatusCode::OK))); // create new
        channel.push_reply(Ok(reply(StatusCode::OK))); // enable new
        channel.push_reply(Ok(reply(StatusCode::OK))); // accept-jobs new
        channel.push_reply(Ok(reply(StatusCode::OK))); // move held job
        channel.push_reply(Ok(reply(StatusCode::OK))); // delete old
        let mut session = Session::new(channel, "root");

        assert!(session.queue_rename("old", "new").await);

        let ops: Vec<Op> = session
            .channel_for_tests()
            .sent
            .iter()
            .map(|(_, r)| r.op)
            .collect();
        // only the held job moves, the stopped one stays behind
        assert_eq!(ops.iter().filter(|op| **op == Op::CupsMoveJob).count(), 1);
        assert_eq!(*ops.last().unwrap(), Op::CupsDeletePrinter);

        // the new printer inherited the device uri
        let create = session
            .channel_for_tests()
            .sent
            .iter()
            .find(|(_, r)| r.op == Op::CupsAddModifyPrinter)
            .unwrap();
        let decoded = IppResponse::decode(&create.1.encode()).unwrap();
        assert_eq!(
            decoded.string(GroupTag::Printer, "device-uri"),
            Some("usb://X/Y")
        );
    }

    #[tokio::test]
    async fn test_rename_keeps_default_destination() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(listing(&["old"]))); // printers
        channel.push_reply(Ok(listing(&[]))); // classes
        channel.push_reply(Ok(job_listing(&[]))); // jobs
        channel.push_reply(Ok(listing(&["old"]))); // old is the default
        channel.push_reply(Ok(reply_with(
            StatusCode::OK,
            vec![printer_group("old", Vec::new())],
        ))); // snapshot
        channel.fetches.push_back(Ok((404, Vec::new()))); // no ppd
        channel.push_reply(Ok(reply(StatusCode::OK))); // reject-jobs old
        channel.push_reply(Ok(reply(StatusCode::OK))); // create new
        channel.push_reply(Ok(reply(StatusCode::OK))); // enable new
        channel.push_reply(Ok(reply(StatusCode::OK))); // accept-jobs new
        channel.push_reply(Ok(reply(StatusCode::OK))); // default moves to new
        channel.push_reply(Ok(reply(StatusCode::OK))); // delete old
        let mut session = Session::new(channel, "root");

        assert!(session.queue_rename("old", "new").await);

        let sent = &session.channel_for_tests().sent;
        let set_default = sent
            .iter()
            .find(|(_, r)| r.op == Op::CupsSetDefault)
            .map(|(_, r)| r);
        let decoded = IppResponse::decode(&set_default.unwrap().encode()).unwrap();
        assert_eq!(
            decoded.string(GroupTag::Operation, "printer-uri"),
            Some("ipp://localhost/printers/new")
        );
    }
}
