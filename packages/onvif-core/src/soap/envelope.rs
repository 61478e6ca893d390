//! SOAP 1.2 envelope construction and parsing.

use super::xml::{extract_xml_text, inner_xml};
use super::{SoapError, SoapResult};
use crate::protocol_constants::ENVELOPE_NAMESPACES;

/// Wraps a body (and optional header) in an envelope declaring every ONVIF namespace.
///
/// The envelope is a single line with no leading whitespace; several
/// camera SOAP stacks reject anything before the root element.
pub fn build_envelope(header: Option<&str>, body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 1024);
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?><s:Envelope"#);
    for (prefix, ns) in ENVELOPE_NAMESPACES {
        out.push_str(&format!(r#" xmlns:{prefix}="{ns}""#));
    }
    out.push('>');
    if let Some(header) = header {
        out.push_str("<s:Header>");
        out.push_str(header);
        out.push_str("</s:Header>");
    }
    out.push_str("<s:Body>");
    out.push_str(body);
    out.push_str("</s:Body></s:Envelope>");
    out
}

/// Returns the raw inner XML of `Envelope/Body`.
pub fn body_xml(envelope: &str) -> SoapResult<&str> {
    inner_xml(envelope, "Body").ok_or_else(|| SoapError::Decode("missing Envelope/Body".into()))
}

/// True when the body carries a `Fault` element.
pub fn has_fault(envelope: &str) -> bool {
    inner_xml(envelope, "Fault").is_some()
}

/// Extracts a human-readable fault description.
///
/// Prefers SOAP 1.2 `Reason/Text`, then SOAP 1.1 `faultstring`, then the
/// most specific `Code/Subcode/Value`.
pub fn fault_text(envelope: &str) -> Option<String> {
    let fault = inner_xml(envelope, "Fault")?;
    extract_xml_text(fault, "Text")
        .or_else(|| extract_xml_text(fault, "faultstring"))
        .or_else(|| {
            inner_xml(fault, "Subcode")
                .and_then(|sub| extract_xml_text(sub, "Value"))
                .or_else(|| extract_xml_text(fault, "Value"))
        })
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{FAULT_SOAP11, FAULT_SOAP12, GET_DEVICE_INFORMATION_RESPONSE};

    #[test]
    fn envelope_declares_namespaces_and_header() {
        let env = build_envelope(Some("<wsse:Security/>"), "<tds:GetDeviceInformation/>");
        assert!(env.starts_with("<?xml"));
        assert!(env.contains(r#"xmlns:tds="http://www.onvif.org/ver10/device/wsdl""#));
        assert!(env.contains(r#"xmlns:tns1="http://www.onvif.org/ver10/topics""#));
        assert!(env.contains("<s:Header><wsse:Security/></s:Header>"));
        assert!(env.ends_with("<s:Body><tds:GetDeviceInformation/></s:Body></s:Envelope>"));
    }

    #[test]
    fn body_is_extracted_from_response() {
        let body = body_xml(GET_DEVICE_INFORMATION_RESPONSE).unwrap();
        assert!(body.trim_start().starts_with("<tds:GetDeviceInformationResponse>"));
        assert!(body_xml("<x/>").is_err());
    }

    #[test]
    fn fault_reason_is_extracted() {
        assert!(has_fault(FAULT_SOAP12));
        assert_eq!(
            fault_text(FAULT_SOAP12).as_deref(),
            Some("Sender not Authorized")
        );
        assert_eq!(fault_text(FAULT_SOAP11).as_deref(), Some("Invalid args"));
        assert_eq!(fault_text(GET_DEVICE_INFORMATION_RESPONSE), None);
    }
}
