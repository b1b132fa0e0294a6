//! Input validation for caller-supplied strings
//!
//! Every string that can end up inside a request to the print service goes
//! through here first. The rules are picked by semantic role: queue names are
//! much stricter than free-text descriptions, and URI schemes follow the
//! RFC 1738 character set.

use thiserror::Error;

/// Strings longer than this can be abused to smuggle extra lines into the
/// service configuration, so everything is capped.
pub const STR_MAXLEN: usize = 512;

/// Queue (printer or class) names are capped the same way lpadmin caps them.
pub const NAME_MAXLEN: usize = 127;

/// Validation failure with the role-specific message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("\"{value}\" is not a valid {role}.")]
pub struct ValidationError {
    pub value: String,
    pub role: &'static str,
}

/// Semantic role of a caller-supplied string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    PrinterName,
    ClassName,
    Scheme,
    PrinterUri,
    Ppd,
    PpdFilename,
    JobSheet,
    ErrorPolicy,
    OpPolicy,
    User,
    OptionName,
    OptionValue,
    Info,
    Location,
    Reason,
    JobHoldUntil,
    Resource,
    Filename,
}

/// Per-role rule set: how a string is allowed to look
struct Rules {
    /// Human-readable role name used in rejection messages
    label: &'static str,
    /// Whether a missing value is acceptable
    null_allowed: bool,
    /// UTF-8 printable text (true) or printable ASCII only (false)
    utf8: bool,
    max_len: usize,
    /// Queue-name restrictions: non-empty, no whitespace, no '/' or '#'
    queue_name: bool,
    /// RFC 1738 scheme restrictions: non-empty, `[a-zA-Z0-9+.-]` only
    scheme: bool,
}

impl Role {
    fn rules(self) -> Rules {
        // Roles that are "some text" could be checked more tightly (whether a
        // policy exists, whether a PPD is in the service database, ...) but
        // the service re-validates all of them anyway.
        match self {
            Role::PrinterName => Rules {
                label: "printer name",
                null_allowed: false,
                utf8: true,
                max_len: NAME_MAXLEN,
                queue_name: true,
                scheme: false,
            },
            Role::ClassName => Rules {
                label: "class name",
                null_allowed: false,
                utf8: true,
                max_len: NAME_MAXLEN,
                queue_name: true,
                scheme: false,
            },
            Role::Scheme => Rules {
                label: "scheme",
                null_allowed: false,
                utf8: false,
                max_len: STR_MAXLEN,
                queue_name: false,
                scheme: true,
            },
            Role::PrinterUri => self.text_rules("printer URI", false, false),
            Role::Ppd => self.text_rules("PPD", true, false),
            Role::PpdFilename => self.text_rules("PPD file", true, false),
            Role::JobSheet => self.text_rules("job sheet", true, false),
            Role::ErrorPolicy => self.text_rules("error policy", true, false),
            Role::OpPolicy => self.text_rules("op policy", true, false),
            // Empty user entries exist in legacy service configurations
            // (blank DenyUser lines); they are filtered out later rather
            // than rejected here.
            Role::User => self.text_rules("user", false, false),
            Role::OptionName => self.text_rules("option", false, false),
            Role::OptionValue => self.text_rules("value for option", true, false),
            Role::Info => self.text_rules("description", true, true),
            Role::Location => self.text_rules("location", true, true),
            Role::Reason => self.text_rules("reason", true, true),
            Role::JobHoldUntil => self.text_rules("job hold until", true, false),
            Role::Resource => self.text_rules("resource", false, false),
            Role::Filename => self.text_rules("filename", false, false),
        }
    }

    fn text_rules(self, label: &'static str, null_allowed: bool, utf8: bool) -> Rules {
        Rules {
            label,
            null_allowed,
            utf8,
            max_len: STR_MAXLEN,
            queue_name: false,
            scheme: false,
        }
    }

    /// Role name as it appears in rejection messages
    pub fn label(self) -> &'static str {
        self.rules().label
    }
}

fn is_printable(value: &str, utf8: bool, max_len: usize) -> bool {
    if value.len() > max_len {
        return false;
    }

    if utf8 {
        // Printable here matches what the service itself accepts for text
        // attributes: no control characters anywhere in the string.
        value.chars().all(|c| !c.is_control())
    } else {
        value.bytes().all(|b| (0x20..0x7f).contains(&b))
    }
}

fn check(role: Role, value: Option<&str>) -> bool {
    let rules = role.rules();

    let value = match value {
        Some(v) => v,
        None => return rules.null_allowed,
    };

    if rules.queue_name {
        // The service accepts any printable name without SPACE, TAB, '/'
        // or '#', at most 127 octets, and rejects the empty string.
        if value.is_empty() {
            return false;
        }
        if !is_printable(value, rules.utf8, rules.max_len) {
            return false;
        }
        return !value
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '#');
    }

    if rules.scheme {
        // RFC 1738: lower case letters, digits, '+', '.' and '-'; upper
        // case letters are tolerated for resiliency.
        if value.is_empty() {
            return false;
        }
        if value.len() > rules.max_len {
            return false;
        }
        return value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'.' || b == b'-');
    }

    is_printable(value, rules.utf8, rules.max_len)
}

/// Validate a caller-supplied string for the given role.
///
/// Never performs I/O. A `None` value is accepted or rejected depending on
/// whether the role permits an absent value.
pub fn validate(role: Role, value: Option<&str>) -> Result<(), ValidationError> {
    if check(role, value) {
        Ok(())
    } else {
        Err(ValidationError {
            value: value.unwrap_or("(null)").to_string(),
            role: role.label(),
        })
    }
}

/// Validate a job identifier: only strictly positive ids exist.
pub fn validate_job_id(job_id: i32) -> Result<(), ValidationError> {
    if job_id > 0 {
        Ok(())
    } else {
        Err(ValidationError {
            value: job_id.to_string(),
            role: "job id",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(role: Role, value: &str) -> bool {
        validate(role, Some(value)).is_ok()
    }

    #[test]
    fn test_printer_name_excluded_characters() {
        assert!(!ok(Role::PrinterName, "Office Printer"));
        assert!(!ok(Role::PrinterName, "a/b"));
        assert!(!ok(Role::PrinterName, "queue#1"));
        assert!(!ok(Role::PrinterName, "tab\tname"));
        assert!(ok(Role::PrinterName, "OfficePrinter"));
    }

    #[test]
    fn test_printer_name_length() {
        let exact = "x".repeat(127);
        let too_long = "x".repeat(128);
        assert!(ok(Role::PrinterName, &exact));
        assert!(!ok(Role::PrinterName, &too_long));
    }

    #[test]
    fn test_printer_name_empty_and_null() {
        assert!(!ok(Role::PrinterName, ""));
        assert!(validate(Role::PrinterName, None).is_err());
    }

    #[test]
    fn test_printer_name_control_characters() {
        assert!(!ok(Role::PrinterName, "queue\u{7}"));
        assert!(!ok(Role::PrinterName, "queue\n"));
    }

    #[test]
    fn test_class_name_same_rules_as_printer() {
        assert!(!ok(Role::ClassName, "my class"));
        assert!(ok(Role::ClassName, "my-class"));
    }

    #[test]
    fn test_scheme() {
        assert!(ok(Role::Scheme, "ipp"));
        assert!(ok(Role::Scheme, "http+ssl"));
        assert!(ok(Role::Scheme, "my.scheme-1"));
        assert!(ok(Role::Scheme, "HTTP"));
        assert!(!ok(Role::Scheme, ""));
        assert!(!ok(Role::Scheme, "HT TP"));
        assert!(!ok(Role::Scheme, "a/b"));
    }

    #[test]
    fn test_job_id() {
        assert!(validate_job_id(42).is_ok());
        assert!(validate_job_id(1).is_ok());
        assert!(validate_job_id(0).is_err());
        assert!(validate_job_id(-5).is_err());
    }

    #[test]
    fn test_free_text_allows_utf8() {
        assert!(ok(Role::Info, "Bürodrucker im 2. Stock"));
        assert!(ok(Role::Location, ""));
        assert!(validate(Role::Info, None).is_ok());
        assert!(!ok(Role::Info, "line\nbreak"));
    }

    #[test]
    fn test_free_text_length_cap() {
        let long = "a".repeat(513);
        assert!(!ok(Role::Info, &long));
        let fits = "a".repeat(512);
        assert!(ok(Role::Info, &fits));
    }

    #[test]
    fn test_strict_token_ascii_only() {
        assert!(ok(Role::Ppd, "drv:///sample.drv/generic.ppd"));
        assert!(!ok(Role::Ppd, "höhere.ppd"));
        assert!(validate(Role::Ppd, None).is_ok());
        assert!(validate(Role::Resource, None).is_err());
    }

    #[test]
    fn test_user_may_be_empty_but_not_null() {
        assert!(ok(Role::User, ""));
        assert!(ok(Role::User, "lp"));
        assert!(validate(Role::User, None).is_err());
    }

    #[test]
    fn test_rejection_message_format() {
        let err = validate(Role::PrinterName, Some("Office Printer")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"Office Printer\" is not a valid printer name."
        );

        let err = validate_job_id(-5).unwrap_err();
        assert_eq!(err.to_string(), "\"-5\" is not a valid job id.");
    }
}
