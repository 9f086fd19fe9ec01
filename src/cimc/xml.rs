//! CIMC XML API command encode / response decode helpers.
//!
//! Commands are built with a quick-xml writer so attribute values are always
//! escaped. Optional attributes with an empty source value are left out of
//! the element altogether; the firmware treats `attr=''` differently from an
//! absent attribute.

use std::collections::BTreeMap;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::config::{CsrSettings, Subject};
use crate::error::{CertError, Result};

/// Managed-object DN of the certificate signing request generator.
pub const GEN_CSR_DN: &str = "sys/cert-mgmt/gen-csr-req";

const LOGIN_COOKIE_ATTR: &str = "outCookie";

// ── Encode ────────────────────────────────────────────────────────────────────

fn finish(writer: Writer<Vec<u8>>) -> Result<String> {
    String::from_utf8(writer.into_inner())
        .map_err(|e| CertError::Protocol(format!("encoded command is not UTF-8: {e}")))
}

fn write_wrapped(writer: &mut Writer<Vec<u8>>, elem: BytesStart<'_>) -> Result<()> {
    let end = BytesEnd::new(String::from_utf8_lossy(elem.name().as_ref()).into_owned());
    writer.write_event(Event::Start(elem))?;
    writer.write_event(Event::End(end))?;
    Ok(())
}

/// `<aaaLogin inName=".." inPassword=".."></aaaLogin>`
pub fn login_command(username: &str, password: &str) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    let elem = BytesStart::new("aaaLogin")
        .with_attributes([("inName", username), ("inPassword", password)]);
    write_wrapped(&mut writer, elem)?;
    finish(writer)
}

/// `<aaaLogout cookie=".." inCookie=".."></aaaLogout>`
pub fn logout_command(cookie: &str) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    let elem = BytesStart::new("aaaLogout")
        .with_attributes([("cookie", cookie), ("inCookie", cookie)]);
    write_wrapped(&mut writer, elem)?;
    finish(writer)
}

fn subject_attributes(subject: &Subject) -> Vec<(&'static str, String)> {
    vec![
        ("commonName",         subject.common_name.clone()),
        ("organization",       subject.organization.clone()),
        ("organizationalUnit", subject.organizational_unit.clone()),
        ("locality",           subject.locality.clone()),
        ("state",              subject.state.clone()),
        ("countryCode",        subject.country_code.clone()),
    ]
}

/// Name the controller gives the uploaded CSR:
/// `{filepath}{commonName}-csr{extension}`.
pub fn remote_file_name(filepath: &str, common_name: &str, extension: &str) -> String {
    format!("{filepath}{common_name}-csr{extension}")
}

/// Wrap a `generateCertificateSigningRequest` element in
/// `configConfMo` / `inConfig`.
fn config_conf_mo(cookie: &str, attrs: &[(&str, String)]) -> Result<String> {
    let mut writer = Writer::new(Vec::new());

    let conf_mo = BytesStart::new("configConfMo").with_attributes([
        ("cookie", cookie),
        ("dn", GEN_CSR_DN),
        ("inHierarchical", "false"),
    ]);
    writer.write_event(Event::Start(conf_mo))?;
    writer.write_event(Event::Start(BytesStart::new("inConfig")))?;

    let mut request = BytesStart::new("generateCertificateSigningRequest");
    for (key, value) in attrs {
        request.push_attribute((*key, value.as_str()));
    }
    writer.write_event(Event::Empty(request))?;

    writer.write_event(Event::End(BytesEnd::new("inConfig")))?;
    writer.write_event(Event::End(BytesEnd::new("configConfMo")))?;
    finish(writer)
}

/// Self-signed certificate command. Carries `selfSigned='yes'` and never any
/// of the CSR upload attributes.
pub fn self_signed_command(cookie: &str, subject: &Subject) -> Result<String> {
    let mut attrs = subject_attributes(subject);
    attrs.push(("dn", GEN_CSR_DN.to_string()));
    attrs.push(("selfSigned", "yes".to_string()));
    config_conf_mo(cookie, &attrs)
}

/// Standard CSR command, optionally uploaded to a remote file server.
pub fn csr_command(cookie: &str, subject: &Subject, csr: &CsrSettings) -> Result<String> {
    let mut attrs = subject_attributes(subject);
    if !csr.email.is_empty() {
        attrs.push(("email", csr.email.clone()));
    }
    attrs.push(("protocol", csr.remote_protocol.as_str().to_string()));
    if !csr.remote_server.is_empty() {
        attrs.push(("remoteServer", csr.remote_server.clone()));
    }
    attrs.push(("user", csr.remote_user.clone()));
    attrs.push(("pwd", csr.remote_password.clone()));
    if !csr.remote_filepath.is_empty() {
        attrs.push((
            "remoteFile",
            remote_file_name(&csr.remote_filepath, &subject.common_name, &csr.remote_file_extension),
        ));
    }
    attrs.push(("signatureAlgorithm", csr.signature_algorithm.as_str().to_string()));
    attrs.push(("dn", GEN_CSR_DN.to_string()));
    config_conf_mo(cookie, &attrs)
}

// ── Decode ────────────────────────────────────────────────────────────────────

/// Attributes of the root element of an XML API response.
pub fn root_attributes(body: &str) -> Result<BTreeMap<String, String>> {
    let mut reader = Reader::from_str(body);
    loop {
        let event = reader
            .read_event()
            .map_err(|e| CertError::Protocol(format!("malformed XML response: {e}")))?;
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let mut attrs = BTreeMap::new();
                for attr in e.attributes() {
                    let attr = attr
                        .map_err(|e| CertError::Protocol(format!("malformed XML attribute: {e}")))?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .unescape_value()
                        .map_err(|e| CertError::Protocol(format!("malformed XML attribute value: {e}")))?
                        .into_owned();
                    attrs.insert(key, value);
                }
                return Ok(attrs);
            }
            Event::Eof => {
                return Err(CertError::Protocol("XML response has no root element".into()));
            }
            // Declaration, comments, whitespace
            _ => {}
        }
    }
}

/// Outcome of decoding an `aaaLogin` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginReply {
    Cookie(String),
    /// No usable cookie; every attribute the controller sent instead.
    Rejected(BTreeMap<String, String>),
}

/// Decode an `aaaLogin` response body.
pub fn parse_login_response(body: &str) -> Result<LoginReply> {
    let mut attrs = root_attributes(body)?;
    match attrs.remove(LOGIN_COOKIE_ATTR) {
        Some(cookie) if !cookie.is_empty() => Ok(LoginReply::Cookie(cookie)),
        Some(cookie) => {
            attrs.insert(LOGIN_COOKIE_ATTR.to_string(), cookie);
            Ok(LoginReply::Rejected(attrs))
        }
        None => Ok(LoginReply::Rejected(attrs)),
    }
}

/// `errorCode` / `errorDescr` pair from a response, if the controller set one.
pub fn response_error(body: &str) -> Option<String> {
    let attrs = root_attributes(body).ok()?;
    let code = attrs.get("errorCode")?;
    let descr = attrs.get("errorDescr").map(String::as_str).unwrap_or("");
    Some(format!("{code} {descr}").trim().to_string())
}
