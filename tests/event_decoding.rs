use gtfs_transformer::event::{decode_key, file_type, S3Event};

const PUT_EVENT: &str = r#"{
  "Records": [
    {
      "eventVersion": "2.1",
      "eventSource": "aws:s3",
      "awsRegion": "us-east-1",
      "eventTime": "2024-03-01T12:00:00.000Z",
      "eventName": "ObjectCreated:Put",
      "userIdentity": { "principalId": "EXAMPLE" },
      "requestParameters": { "sourceIPAddress": "127.0.0.1" },
      "responseElements": { "x-amz-request-id": "C3D13FE58DE4C810" },
      "s3": {
        "s3SchemaVersion": "1.0",
        "configurationId": "gtfs-upload",
        "bucket": {
          "name": "agency-feeds",
          "ownerIdentity": { "principalId": "EXAMPLE" },
          "arn": "arn:aws:s3:::agency-feeds"
        },
        "object": {
          "key": "weekday/Metro+Transit%C3%A9+feed.zip",
          "size": 1024,
          "eTag": "d41d8cd98f00b204e9800998ecf8427e",
          "sequencer": "0A1B2C3D4E5F678901"
        }
      }
    }
  ]
}"#;

#[test]
fn test_parses_put_notification_and_decodes_key() {
    let event = S3Event::from_slice(PUT_EVENT.as_bytes()).expect("event should parse");
    assert_eq!(event.records.len(), 1);

    let record = &event.records[0];
    assert!(record.is_object_created());
    assert_eq!(record.event_source.as_deref(), Some("aws:s3"));
    assert_eq!(record.s3.object.size, Some(1024));
    assert_eq!(record.s3.bucket.arn.as_deref(), Some("arn:aws:s3:::agency-feeds"));

    let object = record.object_ref();
    assert_eq!(object.bucket, "agency-feeds");
    assert_eq!(object.key, "weekday/Metro Transité feed.zip");
}

#[test]
fn test_removed_events_are_not_object_created() {
    let payload = PUT_EVENT.replace("ObjectCreated:Put", "ObjectRemoved:Delete");
    let event = S3Event::from_slice(payload.as_bytes()).unwrap();
    assert!(!event.records[0].is_object_created());
}

#[test]
fn test_minimal_event_without_event_name_counts_as_created() {
    let payload = r#"{"Records":[{"s3":{"bucket":{"name":"b"},"object":{"key":"k.zip"}}}]}"#;
    let event = S3Event::from_slice(payload.as_bytes()).unwrap();
    assert!(event.records[0].is_object_created());
}

#[test]
fn test_garbage_payload_is_an_error() {
    assert!(S3Event::from_slice(b"not json").is_err());
    assert!(S3Event::from_slice(br#"{"Records":[{"s3":{}}]}"#).is_err());
}

#[test]
fn test_decode_key_handles_plus_and_percent_escapes() {
    assert_eq!(decode_key("a+b.zip"), "a b.zip");
    // An encoded plus is a literal plus, not a space.
    assert_eq!(decode_key("a%2Bb.zip"), "a+b.zip");
    assert_eq!(decode_key("plain/key.zip"), "plain/key.zip");
    // Invalid UTF-8 after decoding falls back to the raw key.
    assert_eq!(decode_key("bad%FF.zip"), "bad%FF.zip");
}

#[test]
fn test_file_type_is_lowercased_suffix_after_last_dot() {
    assert_eq!(file_type("feed.ZIP").as_deref(), Some("zip"));
    assert_eq!(file_type("feed.zip.transform.txt").as_deref(), Some("txt"));
    assert_eq!(file_type("dir.v2/feed").as_deref(), Some("v2/feed"));
    assert_eq!(file_type("feed."), Some(String::new()));
    assert_eq!(file_type("no_extension"), None);
}
