//! IPP message model and binary codec
//!
//! Just enough of RFC 8010/8011 to drive the administrative operations of a
//! CUPS-compatible print service: request building with the standard leading
//! charset/language attributes, and response decoding into typed attribute
//! groups so callers never walk raw name/tag pairs.

use std::fmt;
use thiserror::Error;

/// Protocol version sent in every request (IPP/1.1)
const VERSION: [u8; 2] = [1, 1];

/// Operation codes used by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Op {
    CancelJob = 0x0008,
    GetJobAttributes = 0x0009,
    GetJobs = 0x000a,
    GetPrinterAttributes = 0x000b,
    RestartJob = 0x000e,
    PausePrinter = 0x0010,
    ResumePrinter = 0x0011,
    SetJobAttributes = 0x0014,
    CupsGetDefault = 0x4001,
    CupsGetPrinters = 0x4002,
    CupsAddModifyPrinter = 0x4003,
    CupsDeletePrinter = 0x4004,
    CupsGetClasses = 0x4005,
    CupsAddModifyClass = 0x4006,
    CupsDeleteClass = 0x4007,
    CupsAcceptJobs = 0x4008,
    CupsRejectJobs = 0x4009,
    CupsSetDefault = 0x400a,
    CupsGetDevices = 0x400b,
    CupsMoveJob = 0x400d,
}

/// Service status code from a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0x0000);
    pub const OK_SUBSTITUTED: StatusCode = StatusCode(0x0001);
    pub const OK_CONFLICTING: StatusCode = StatusCode(0x0002);
    pub const BAD_REQUEST: StatusCode = StatusCode(0x0400);
    pub const FORBIDDEN: StatusCode = StatusCode(0x0401);
    pub const NOT_AUTHENTICATED: StatusCode = StatusCode(0x0402);
    pub const NOT_AUTHORIZED: StatusCode = StatusCode(0x0403);
    pub const NOT_POSSIBLE: StatusCode = StatusCode(0x0404);
    pub const TIMEOUT: StatusCode = StatusCode(0x0405);
    pub const NOT_FOUND: StatusCode = StatusCode(0x0406);
    pub const INTERNAL_ERROR: StatusCode = StatusCode(0x0500);
    pub const OPERATION_NOT_SUPPORTED: StatusCode = StatusCode(0x0501);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(0x0502);

    /// Anything up to "successful-ok-conflicting-attributes" counts as
    /// success; the request went through, possibly with warnings.
    pub fn is_ok(self) -> bool {
        self <= StatusCode::OK_CONFLICTING
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            StatusCode::OK => "successful-ok",
            StatusCode::OK_SUBSTITUTED => "successful-ok-ignored-or-substituted-attributes",
            StatusCode::OK_CONFLICTING => "successful-ok-conflicting-attributes",
            StatusCode::BAD_REQUEST => "client-error-bad-request",
            StatusCode::FORBIDDEN => "client-error-forbidden",
            StatusCode::NOT_AUTHENTICATED => "client-error-not-authenticated",
            StatusCode::NOT_AUTHORIZED => "client-error-not-authorized",
            StatusCode::NOT_POSSIBLE => "client-error-not-possible",
            StatusCode::TIMEOUT => "client-error-timeout",
            StatusCode::NOT_FOUND => "client-error-not-found",
            StatusCode::INTERNAL_ERROR => "server-error-internal-error",
            StatusCode::OPERATION_NOT_SUPPORTED => "server-error-operation-not-supported",
            StatusCode::SERVICE_UNAVAILABLE => "server-error-service-unavailable",
            StatusCode(code) => return write!(f, "status-code-0x{code:04x}"),
        };
        f.write_str(name)
    }
}

/// Attribute group delimiters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GroupTag {
    Operation = 0x01,
    Job = 0x02,
    Printer = 0x04,
    Unsupported = 0x05,
}

impl GroupTag {
    fn from_u8(tag: u8) -> Option<GroupTag> {
        match tag {
            0x01 => Some(GroupTag::Operation),
            0x02 => Some(GroupTag::Job),
            0x04 => Some(GroupTag::Printer),
            0x05 => Some(GroupTag::Unsupported),
            _ => None,
        }
    }
}

const END_TAG: u8 = 0x03;

mod value_tag {
    pub const INTEGER: u8 = 0x21;
    pub const BOOLEAN: u8 = 0x22;
    pub const ENUM: u8 = 0x23;
    pub const TEXT: u8 = 0x41;
    pub const NAME: u8 = 0x42;
    pub const KEYWORD: u8 = 0x44;
    pub const URI: u8 = 0x45;
    pub const CHARSET: u8 = 0x47;
    pub const LANGUAGE: u8 = 0x48;
    pub const DELETE_ATTR: u8 = 0x16;
}

/// A single typed attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i32),
    Boolean(bool),
    Enum(i32),
    Text(String),
    Name(String),
    Keyword(String),
    Uri(String),
    Charset(String),
    Language(String),
    /// Out-of-band "delete-attribute" marker
    DeleteAttr,
    /// Anything this codec does not interpret
    Octets(u8, Vec<u8>),
}

impl Value {
    fn tag(&self) -> u8 {
        match self {
            Value::Integer(_) => value_tag::INTEGER,
            Value::Boolean(_) => value_tag::BOOLEAN,
            Value::Enum(_) => value_tag::ENUM,
            Value::Text(_) => value_tag::TEXT,
            Value::Name(_) => value_tag::NAME,
            Value::Keyword(_) => value_tag::KEYWORD,
            Value::Uri(_) => value_tag::URI,
            Value::Charset(_) => value_tag::CHARSET,
            Value::Language(_) => value_tag::LANGUAGE,
            Value::DeleteAttr => value_tag::DELETE_ATTR,
            Value::Octets(tag, _) => *tag,
        }
    }

    /// String content regardless of the text-ish tag it arrived with
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s)
            | Value::Name(s)
            | Value::Keyword(s)
            | Value::Uri(s)
            | Value::Charset(s)
            | Value::Language(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Integer(n) | Value::Enum(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

/// Named attribute with one or more values
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<Value>,
}

/// One delimited attribute group
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub tag: GroupTag,
    pub attributes: Vec<Attribute>,
}

impl Group {
    pub fn find(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.find(name).and_then(|a| a.values.first()?.as_str())
    }

    pub fn strings(&self, name: &str) -> Vec<String> {
        self.find(name)
            .map(|a| {
                a.values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn integer(&self, name: &str) -> Option<i32> {
        self.find(name).and_then(|a| a.values.first()?.as_i32())
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.find(name).and_then(|a| a.values.first()?.as_bool())
    }
}

/// Escape a queue name for embedding in an ipp:// URI path segment
fn escape_uri_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// URI of a printer on the local service
pub fn printer_uri(name: &str) -> String {
    format!("ipp://localhost/printers/{}", escape_uri_component(name))
}

/// URI of a class on the local service
pub fn class_uri(name: &str) -> String {
    format!("ipp://localhost/classes/{}", escape_uri_component(name))
}

/// URI of a job on the local service
pub fn job_uri(job_id: i32) -> String {
    format!("ipp://localhost/jobs/{job_id}")
}

/// Outgoing request under construction
#[derive(Debug, Clone)]
pub struct IppRequest {
    pub op: Op,
    pub request_id: u32,
    groups: Vec<Group>,
}

impl IppRequest {
    /// Start a request; the mandatory charset and natural-language
    /// attributes lead the operation group.
    pub fn new(op: Op) -> Self {
        let mut request = Self {
            op,
            request_id: 1,
            groups: Vec::new(),
        };
        request.add(
            GroupTag::Operation,
            "attributes-charset",
            Value::Charset("utf-8".into()),
        );
        request.add(
            GroupTag::Operation,
            "attributes-natural-language",
            Value::Language("en".into()),
        );
        request
    }

    fn group_mut(&mut self, tag: GroupTag) -> &mut Group {
        if let Some(pos) = self.groups.iter().position(|g| g.tag == tag) {
            return &mut self.groups[pos];
        }
        self.groups.push(Group {
            tag,
            attributes: Vec::new(),
        });
        let last = self.groups.len() - 1;
        &mut self.groups[last]
    }

    pub fn add(&mut self, group: GroupTag, name: &str, value: Value) -> &mut Self {
        self.group_mut(group).attributes.push(Attribute {
            name: name.to_string(),
            values: vec![value],
        });
        self
    }

    pub fn add_values(&mut self, group: GroupTag, name: &str, values: Vec<Value>) -> &mut Self {
        self.group_mut(group).attributes.push(Attribute {
            name: name.to_string(),
            values,
        });
        self
    }

    /// Target a printer by name ("printer-uri" in the operation group)
    pub fn target_printer(&mut self, name: &str) -> &mut Self {
        self.add(
            GroupTag::Operation,
            "printer-uri",
            Value::Uri(printer_uri(name)),
        )
    }

    /// Target a class by name
    pub fn target_class(&mut self, name: &str) -> &mut Self {
        self.add(
            GroupTag::Operation,
            "printer-uri",
            Value::Uri(class_uri(name)),
        )
    }

    /// Target a job by id ("job-uri" in the operation group)
    pub fn target_job(&mut self, job_id: i32) -> &mut Self {
        self.add(GroupTag::Operation, "job-uri", Value::Uri(job_uri(job_id)))
    }

    /// Destination printer of a job move
    pub fn job_printer(&mut self, name: &str) -> &mut Self {
        self.add(
            GroupTag::Operation,
            "job-printer-uri",
            Value::Uri(printer_uri(name)),
        )
    }

    pub fn requesting_user(&mut self, user: &str) -> &mut Self {
        self.add(
            GroupTag::Operation,
            "requesting-user-name",
            Value::Name(user.to_string()),
        )
    }

    pub fn requested_attributes(&mut self, names: &[&str]) -> &mut Self {
        self.add_values(
            GroupTag::Operation,
            "requested-attributes",
            names
                .iter()
                .map(|n| Value::Keyword((*n).to_string()))
                .collect(),
        )
    }

    /// Serialize to wire format
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&VERSION);
        out.extend_from_slice(&(self.op as u16).to_be_bytes());
        out.extend_from_slice(&self.request_id.to_be_bytes());

        for group in &self.groups {
            out.push(group.tag as u8);
            for attr in &group.attributes {
                for (i, value) in attr.values.iter().enumerate() {
                    out.push(value.tag());
                    // Additional values of a multi-valued attribute carry
                    // an empty name.
                    let name = if i == 0 { attr.name.as_bytes() } else { &[] };
                    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
                    out.extend_from_slice(name);
                    encode_value(&mut out, value);
                }
            }
        }

        out.push(END_TAG);
        out
    }
}

fn encode_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(n) | Value::Enum(n) => {
            out.extend_from_slice(&4u16.to_be_bytes());
            out.extend_from_slice(&n.to_be_bytes());
        }
        Value::Boolean(b) => {
            out.extend_from_slice(&1u16.to_be_bytes());
            out.push(u8::from(*b));
        }
        Value::Text(s)
        | Value::Name(s)
        | Value::Keyword(s)
        | Value::Uri(s)
        | Value::Charset(s)
        | Value::Language(s) => {
            out.extend_from_slice(&(s.len() as u16).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::DeleteAttr => {
            out.extend_from_slice(&0u16.to_be_bytes());
        }
        Value::Octets(_, data) => {
            out.extend_from_slice(&(data.len() as u16).to_be_bytes());
            out.extend_from_slice(data);
        }
    }
}

/// Decoded reply from the service
#[derive(Debug, Clone)]
pub struct IppResponse {
    pub status: StatusCode,
    pub request_id: u32,
    pub groups: Vec<Group>,
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("truncated message at offset {0}")]
    Truncated(usize),
    #[error("attribute value outside any group")]
    ValueOutsideGroup,
    #[error("invalid UTF-8 in attribute content")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.data.len() {
            return Err(CodecError::Truncated(self.pos));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

fn decode_value(tag: u8, data: &[u8]) -> Result<Value, CodecError> {
    let int = |data: &[u8]| -> i32 {
        if data.len() == 4 {
            i32::from_be_bytes([data[0], data[1], data[2], data[3]])
        } else {
            0
        }
    };

    let text = |data: &[u8]| -> Result<String, CodecError> {
        Ok(String::from_utf8(data.to_vec())?)
    };

    Ok(match tag {
        value_tag::INTEGER => Value::Integer(int(data)),
        value_tag::ENUM => Value::Enum(int(data)),
        value_tag::BOOLEAN => Value::Boolean(data.first().copied().unwrap_or(0) != 0),
        value_tag::TEXT => Value::Text(text(data)?),
        value_tag::NAME => Value::Name(text(data)?),
        value_tag::KEYWORD => Value::Keyword(text(data)?),
        value_tag::URI => Value::Uri(text(data)?),
        value_tag::CHARSET => Value::Charset(text(data)?),
        value_tag::LANGUAGE => Value::Language(text(data)?),
        value_tag::DELETE_ATTR => Value::DeleteAttr,
        other => Value::Octets(other, data.to_vec()),
    })
}

impl IppResponse {
    /// Parse a reply from wire format.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader { data, pos: 0 };

        let _version = r.take(2)?;
        let status = StatusCode(r.u16()?);
        let request_id = r.u32()?;

        let mut groups: Vec<Group> = Vec::new();

        loop {
            let tag = r.u8()?;
            if tag == END_TAG {
                break;
            }

            if tag < 0x10 {
                // Delimiter: a new attribute group starts. Unknown group
                // tags are kept as Unsupported so their content is skipped
                // coherently.
                groups.push(Group {
                    tag: GroupTag::from_u8(tag).unwrap_or(GroupTag::Unsupported),
                    attributes: Vec::new(),
                });
                continue;
            }

            // Value tag: an attribute (or an additional value of the
            // previous one when the name is empty).
            let name_len = r.u16()? as usize;
            let name = String::from_utf8(r.take(name_len)?.to_vec())?;
            let value_len = r.u16()? as usize;
            let value = decode_value(tag, r.take(value_len)?)?;

            let group = groups.last_mut().ok_or(CodecError::ValueOutsideGroup)?;
            if name.is_empty() {
                if let Some(attr) = group.attributes.last_mut() {
                    attr.values.push(value);
                }
            } else {
                group.attributes.push(Attribute {
                    name,
                    values: vec![value],
                });
            }
        }

        Ok(Self {
            status,
            request_id,
            groups,
        })
    }

    /// First group with the given tag
    pub fn group(&self, tag: GroupTag) -> Option<&Group> {
        self.groups.iter().find(|g| g.tag == tag)
    }

    /// All groups with the given tag, in reply order
    pub fn groups_of(&self, tag: GroupTag) -> impl Iterator<Item = &Group> {
        self.groups.iter().filter(move |g| g.tag == tag)
    }

    /// Convenience: first string value of a named attribute in a group kind
    pub fn string(&self, tag: GroupTag, name: &str) -> Option<&str> {
        self.groups_of(tag).find_map(|g| g.string(name))
    }
}
