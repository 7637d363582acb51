use super::*;
use serde::ser::Error as _;
use std::collections::HashMap;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Reading {
    sensor: String,
    celsius: f64,
    tags: Vec<String>,
}

fn reading() -> Reading {
    Reading {
        sensor: "boiler-1".to_string(),
        celsius: 71.5,
        tags: vec!["basement".to_string()],
    }
}

/// Serializes into an error unconditionally.
struct Unserializable;

impl Serialize for Unserializable {
    fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom("refusing to serialize"))
    }
}

#[test]
fn test_json_encodes_compact_json() {
    let bytes = JsonCodec.marshal(&reading()).unwrap();
    let text = String::from_utf8(bytes.clone()).unwrap();
    assert_eq!(
        text,
        r#"{"sensor":"boiler-1","celsius":71.5,"tags":["basement"]}"#
    );
    let decoded: Reading = JsonCodec.unmarshal(&bytes).unwrap();
    assert_eq!(decoded, reading());
}

#[test]
fn test_yaml_decodes_what_it_encodes() {
    let bytes = YamlCodec.marshal(&reading()).unwrap();
    let text = String::from_utf8(bytes.clone()).unwrap();
    assert!(text.contains("sensor: boiler-1"));
    let decoded: Reading = YamlCodec.unmarshal(&bytes).unwrap();
    assert_eq!(decoded, reading());
}

#[test]
fn test_json_rejects_non_string_map_keys() {
    let mut map = HashMap::new();
    map.insert((1u8, 2u8), "pair");
    let err = JsonCodec.marshal(&map).unwrap_err();
    assert!(matches!(err, CodecError::Serialize { codec: "json", .. }));
}

#[test]
fn test_serializer_errors_are_reported() {
    assert!(matches!(
        JsonCodec.marshal(&Unserializable),
        Err(CodecError::Serialize { .. })
    ));
    assert!(matches!(
        YamlCodec.marshal(&Unserializable),
        Err(CodecError::Serialize { .. })
    ));
}

#[test]
fn test_garbage_input_fails_to_decode() {
    let err = JsonCodec.unmarshal::<Reading>(b"{not json").unwrap_err();
    assert!(matches!(err, CodecError::Deserialize { codec: "json", .. }));
}

#[test]
fn test_codec_kind_dispatches() {
    assert_eq!(CodecKind::default(), CodecKind::Json);
    assert_eq!(CodecKind::Yaml.name(), "yaml");

    let bytes = CodecKind::Yaml.marshal(&reading()).unwrap();
    assert_eq!(YamlCodec.unmarshal::<Reading>(&bytes).unwrap(), reading());
}

#[test]
fn test_codec_kind_parses_lowercase_names() {
    let kind: CodecKind = serde_json::from_str("\"yaml\"").unwrap();
    assert_eq!(kind, CodecKind::Yaml);
    assert_eq!(
        serde_json::from_str::<CodecKind>("\"xml\"").unwrap(),
        CodecKind::Xml
    );
    assert!(serde_json::from_str::<CodecKind>("\"toml\"").is_err());
}

#[test]
fn test_xml_wraps_payload_in_message_element() {
    let bytes = XmlCodec.marshal(&reading()).unwrap();
    let text = String::from_utf8(bytes.clone()).unwrap();
    assert!(text.starts_with("<message>"));
    assert!(text.contains("<sensor>boiler-1</sensor>"));
    assert!(text.ends_with("</message>"));
    let decoded: Reading = XmlCodec.unmarshal(&bytes).unwrap();
    assert_eq!(decoded, reading());
}

#[test]
fn test_xml_rejects_malformed_documents() {
    let err = XmlCodec.unmarshal::<Reading>(b"<message><sensor>").unwrap_err();
    assert!(matches!(err, CodecError::Deserialize { codec: "xml", .. }));
    let err = XmlCodec.unmarshal::<Reading>(&[0xff, 0xfe]).unwrap_err();
    assert!(matches!(err, CodecError::Deserialize { codec: "xml", .. }));
    assert_eq!(CodecKind::Xml.name(), "xml");
}
