//! Shared test fixtures for ONVIF SOAP payloads.
//!
//! These constants are used by multiple test modules to avoid duplication,
//! together with a loopback HTTP server standing in for a camera.

use std::net::SocketAddr;

use axum::response::{IntoResponse, Response};
use axum::Router;

/// Wraps a body in a minimal SOAP 1.2 response envelope.
pub fn envelope(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://www.w3.org/2003/05/soap-envelope" xmlns:tds="http://www.onvif.org/ver10/device/wsdl" xmlns:tt="http://www.onvif.org/ver10/schema" xmlns:tev="http://www.onvif.org/ver10/events/wsdl" xmlns:wsnt="http://docs.oasis-open.org/wsn/b-2" xmlns:wsa5="http://www.w3.org/2005/08/addressing" xmlns:trt="http://www.onvif.org/ver10/media/wsdl" xmlns:tns1="http://www.onvif.org/ver10/topics">
<SOAP-ENV:Body>{body}</SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#
    )
}

pub const GET_DEVICE_INFORMATION_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://www.w3.org/2003/05/soap-envelope" xmlns:tds="http://www.onvif.org/ver10/device/wsdl">
<SOAP-ENV:Body>
<tds:GetDeviceInformationResponse>
<tds:Manufacturer>Acme</tds:Manufacturer>
<tds:Model>Cam1</tds:Model>
<tds:FirmwareVersion>1.2.3</tds:FirmwareVersion>
<tds:SerialNumber>SN0001</tds:SerialNumber>
<tds:HardwareId>HW-7</tds:HardwareId>
</tds:GetDeviceInformationResponse>
</SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;

pub const GET_DEVICE_INFORMATION_BODY: &str = r#"<tds:GetDeviceInformationResponse><tds:Manufacturer>Acme</tds:Manufacturer><tds:Model>Cam1</tds:Model><tds:FirmwareVersion>1.2.3</tds:FirmwareVersion><tds:SerialNumber>SN0001</tds:SerialNumber><tds:HardwareId>HW-7</tds:HardwareId></tds:GetDeviceInformationResponse>"#;

/// SOAP 1.2 fault with Reason/Text.
pub const FAULT_SOAP12: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:ter="http://www.onvif.org/ver10/error">
<env:Body>
<env:Fault>
<env:Code><env:Value>env:Sender</env:Value><env:Subcode><env:Value>ter:NotAuthorized</env:Value></env:Subcode></env:Code>
<env:Reason><env:Text xml:lang="en">Sender not Authorized</env:Text></env:Reason>
</env:Fault>
</env:Body>
</env:Envelope>"#;

/// SOAP 1.1 style fault with faultstring.
pub const FAULT_SOAP11: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>Invalid args</faultstring></s:Fault></s:Body></s:Envelope>"#;

pub const GET_CAPABILITIES_BODY: &str = r#"<tds:GetCapabilitiesResponse>
<tds:Capabilities>
<tt:Analytics><tt:XAddr>http://192.168.1.20/onvif/analytics_service</tt:XAddr></tt:Analytics>
<tt:Device><tt:XAddr>http://192.168.1.20/onvif/device_service</tt:XAddr></tt:Device>
<tt:Events><tt:XAddr>http://192.168.1.20/onvif/event_service</tt:XAddr><tt:WSPullPointSupport>true</tt:WSPullPointSupport></tt:Events>
<tt:Imaging><tt:XAddr>http://192.168.1.20/onvif/imaging_service</tt:XAddr></tt:Imaging>
<tt:Media><tt:XAddr>http://192.168.1.20/onvif/media_service</tt:XAddr></tt:Media>
<tt:PTZ><tt:XAddr>http://192.168.1.20/onvif/ptz_service</tt:XAddr></tt:PTZ>
</tds:Capabilities>
</tds:GetCapabilitiesResponse>"#;

pub const GET_SERVICES_BODY: &str = r#"<tds:GetServicesResponse>
<tds:Service><tds:Namespace>http://www.onvif.org/ver10/device/wsdl</tds:Namespace><tds:XAddr>http://192.168.1.20/onvif/device_service</tds:XAddr><tds:Version><tt:Major>2</tt:Major><tt:Minor>40</tt:Minor></tds:Version></tds:Service>
<tds:Service><tds:Namespace>http://www.onvif.org/ver20/media/wsdl</tds:Namespace><tds:XAddr>http://192.168.1.20/onvif/media2_service</tds:XAddr><tds:Version><tt:Major>2</tt:Major><tt:Minor>60</tt:Minor></tds:Version></tds:Service>
<tds:Service><tds:Namespace>http://example.com/vendor/wsdl</tds:Namespace><tds:XAddr>http://192.168.1.20/onvif/vendor</tds:XAddr></tds:Service>
</tds:GetServicesResponse>"#;

pub const GET_NETWORK_INTERFACES_BODY: &str = r#"<tds:GetNetworkInterfacesResponse>
<tds:NetworkInterfaces token="eth0">
<tt:Enabled>true</tt:Enabled>
<tt:Info><tt:Name>eth0</tt:Name><tt:HwAddress>AA:BB:CC:DD:EE:FF</tt:HwAddress><tt:MTU>1500</tt:MTU></tt:Info>
</tds:NetworkInterfaces>
</tds:GetNetworkInterfacesResponse>"#;

pub const GET_ENDPOINT_REFERENCE_BODY: &str = r#"<tds:GetEndpointReferenceResponse><tds:GUID>urn:uuid:abc</tds:GUID></tds:GetEndpointReferenceResponse>"#;

pub const GET_SYSTEM_DATE_AND_TIME_BODY: &str = r#"<tds:GetSystemDateAndTimeResponse>
<tds:SystemDateAndTime>
<tt:DateTimeType>NTP</tt:DateTimeType>
<tt:UTCDateTime><tt:Time><tt:Hour>10</tt:Hour><tt:Minute>4</tt:Minute><tt:Second>5</tt:Second></tt:Time><tt:Date><tt:Year>2024</tt:Year><tt:Month>3</tt:Month><tt:Day>9</tt:Day></tt:Date></tt:UTCDateTime>
</tds:SystemDateAndTime>
</tds:GetSystemDateAndTimeResponse>"#;

pub const CREATE_PULL_POINT_BODY: &str = r#"<tev:CreatePullPointSubscriptionResponse>
<tev:SubscriptionReference><wsa5:Address>http://192.168.1.20/onvif/pullpoint/1</wsa5:Address></tev:SubscriptionReference>
<wsnt:CurrentTime>2024-03-09T10:04:05Z</wsnt:CurrentTime>
<wsnt:TerminationTime>2024-03-09T10:04:35Z</wsnt:TerminationTime>
</tev:CreatePullPointSubscriptionResponse>"#;

pub const PULL_MESSAGES_BODY: &str = r#"<tev:PullMessagesResponse>
<tev:CurrentTime>2024-03-09T10:04:06Z</tev:CurrentTime>
<tev:TerminationTime>2024-03-09T10:04:36Z</tev:TerminationTime>
<wsnt:NotificationMessage>
<wsnt:Topic Dialect="http://www.onvif.org/ver10/tev/topicExpression/ConcreteSet">tns1:RuleEngine/CellMotionDetector/Motion</wsnt:Topic>
<wsnt:Message><tt:Message UtcTime="2024-03-09T10:04:06Z" PropertyOperation="Changed">
<tt:Source><tt:SimpleItem Name="VideoSourceConfigurationToken" Value="VideoSourceToken"/></tt:Source>
<tt:Data><tt:SimpleItem Name="IsMotion" Value="true"/></tt:Data>
</tt:Message></wsnt:Message>
</wsnt:NotificationMessage>
<wsnt:NotificationMessage>
<wsnt:Topic Dialect="http://www.onvif.org/ver10/tev/topicExpression/ConcreteSet">tns1:RuleEngine/TamperDetector/Tamper</wsnt:Topic>
<wsnt:Message><tt:Message UtcTime="2024-03-09T10:04:06Z" PropertyOperation="Initialized">
<tt:Data><tt:SimpleItem Name="IsTamper" Value="false"/></tt:Data>
</tt:Message></wsnt:Message>
</wsnt:NotificationMessage>
</tev:PullMessagesResponse>"#;

pub const EMPTY_PULL_MESSAGES_BODY: &str = r#"<tev:PullMessagesResponse><tev:CurrentTime>2024-03-09T10:04:06Z</tev:CurrentTime><tev:TerminationTime>2024-03-09T10:04:36Z</tev:TerminationTime></tev:PullMessagesResponse>"#;

pub const SUBSCRIBE_BODY: &str = r#"<wsnt:SubscribeResponse>
<wsnt:SubscriptionReference><wsa5:Address>http://192.168.1.20/onvif/subscription/7</wsa5:Address></wsnt:SubscriptionReference>
<wsnt:CurrentTime>2024-03-09T10:04:05Z</wsnt:CurrentTime>
<wsnt:TerminationTime>2024-03-09T10:05:05Z</wsnt:TerminationTime>
</wsnt:SubscribeResponse>"#;

pub const GET_SNAPSHOT_URI_BODY: &str = r#"<trt:GetSnapshotUriResponse><trt:MediaUri><tt:Uri>http://192.168.1.20/snapshot.jpg</tt:Uri><tt:InvalidAfterConnect>false</tt:InvalidAfterConnect><tt:InvalidAfterReboot>false</tt:InvalidAfterReboot><tt:Timeout>PT0S</tt:Timeout></trt:MediaUri></trt:GetSnapshotUriResponse>"#;

pub const SET_NETWORK_INTERFACES_BODY: &str = r#"<tds:SetNetworkInterfacesResponse><tds:RebootNeeded>true</tds:RebootNeeded></tds:SetNetworkInterfacesResponse>"#;

/// Push notification as delivered to the ingress route.
pub const NOTIFY_ENVELOPE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:wsnt="http://docs.oasis-open.org/wsn/b-2" xmlns:tt="http://www.onvif.org/ver10/schema">
<s:Body>
<wsnt:Notify>
<wsnt:NotificationMessage>
<wsnt:Topic Dialect="http://www.onvif.org/ver10/tev/topicExpression/ConcreteSet">tns1:VideoSource/MotionAlarm</wsnt:Topic>
<wsnt:Message><tt:Message UtcTime="2024-03-09T10:04:06Z" PropertyOperation="Changed">
<tt:Data><tt:SimpleItem Name="State" Value="true"/></tt:Data>
</tt:Message></wsnt:Message>
</wsnt:NotificationMessage>
</wsnt:Notify>
</s:Body>
</s:Envelope>"#;

/// WS-Discovery ProbeMatches datagram.
pub const PROBE_MATCHES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://www.w3.org/2003/05/soap-envelope" xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery" xmlns:dn="http://www.onvif.org/ver10/network/wsdl">
<SOAP-ENV:Header><wsa:RelatesTo>uuid:probe-1</wsa:RelatesTo></SOAP-ENV:Header>
<SOAP-ENV:Body>
<d:ProbeMatches>
<d:ProbeMatch>
<wsa:EndpointReference><wsa:Address>urn:uuid:A</wsa:Address></wsa:EndpointReference>
<d:Types>dn:NetworkVideoTransmitter</d:Types>
<d:Scopes>onvif://www.onvif.org/type/video_encoder onvif://www.onvif.org/hardware/Cam1 onvif://www.onvif.org/name/Acme</d:Scopes>
<d:XAddrs>http://192.168.1.1:8080/onvif/device_service http://[fe80::1]/onvif/device_service</d:XAddrs>
<d:MetadataVersion>1</d:MetadataVersion>
</d:ProbeMatch>
</d:ProbeMatches>
</SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;

/// Serves `router` on an ephemeral loopback port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Local name of the first element inside `Envelope/Body` of a request.
pub fn operation_name(request: &str) -> String {
    let body = crate::soap::envelope::body_xml(request).unwrap_or_default();
    let start = body.find('<').map(|i| i + 1).unwrap_or(0);
    let tag: String = body[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '>' && *c != '/')
        .collect();
    match tag.split_once(':') {
        Some((_, local)) => local.to_string(),
        None => tag,
    }
}

/// 200 response carrying `body` in a SOAP envelope.
pub fn soap_ok(body: &str) -> Response {
    (
        [(axum::http::header::CONTENT_TYPE, "application/soap+xml")],
        envelope(body),
    )
        .into_response()
}
