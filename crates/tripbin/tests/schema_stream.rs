use tripbin::format::floats_from_bytes;
use tripbin::schema::{encode_stream, parse_transforms, write_schema, NULL_SENTINEL};
use tripbin::Error;

const TRANSFORMS: &str = r#"[
    { "name": "pickup", "dataType": "vec2", "source": ["pickup_lng", "pickup_lat"] },
    { "name": "fare", "dataType": "float", "source": "fare", "nullIf": ["", "NA"] },
    { "name": "vendor", "dataType": "string", "source": "vendor" },
    { "name": "at", "dataType": "datetime", "source": "at", "format": "unix" }
]"#;

const TRIPS: &str = "\
pickup_lng,pickup_lat,fare,vendor,at
-122.5,37.5,10,CMT,100
-122.0,38.0,NA,VTS,200
,,30,CMT,300
";

#[test]
fn csv_stream_to_floats_and_schema() {
    let columns = parse_transforms(TRANSFORMS).unwrap();
    let (schema, bytes) =
        encode_stream(TRIPS.as_bytes(), b',', columns, Vec::new(), || true).unwrap();

    let floats = floats_from_bytes(&bytes).unwrap();
    // vec2 + float + string + datetime
    assert_eq!(floats.len(), 3 * 5);
    assert_eq!(&floats[0..5], &[-122.5, 37.5, 10.0, 0.0, 100.0]);
    assert_eq!(&floats[5..10], &[-122.0, 38.0, NULL_SENTINEL, 1.0, 200.0]);
    assert_eq!(&floats[10..15], &[NULL_SENTINEL, NULL_SENTINEL, 30.0, 0.0, 300.0]);

    assert_eq!(schema[2].value_set.as_deref(), Some(&["CMT".to_owned(), "VTS".to_owned()][..]));
    assert!(schema[0].value_set.is_none());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trips.schema.json");
    write_schema(&path, &schema).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json[0]["name"], "pickup");
    assert_eq!(json[0]["dataType"], "vec2");
    assert_eq!(json[0]["stats"]["counts"]["nonnull"], 2);
    assert_eq!(json[0]["stats"]["extent"][0], serde_json::json!([-122.5, 37.5]));
    assert_eq!(json[1]["stats"]["counts"]["nonnull"], 2);
    assert_eq!(json[1]["stats"]["mean"], 20.0);
    assert_eq!(json[2]["stats"]["counts"]["CMT"], 2);
    assert_eq!(json[2]["valueSet"], serde_json::json!(["CMT", "VTS"]));
    assert_eq!(json[3]["stats"]["extent"], serde_json::json!([100.0, 300.0]));
}

#[test]
fn type_mismatch_stops_before_the_row_is_written() {
    use tripbin::schema::{ColumnSpec, DataType, Value};

    let columns = vec![
        ColumnSpec::new("a", DataType::Float, |row| {
            Ok(Some(Value::Float(row.require("a")?.parse().unwrap_or(0.0))))
        }),
        ColumnSpec::new("b", DataType::Float, |row| {
            Ok(match row.require("b")? {
                "oops" => Some(Value::String("oops".into())),
                text => Some(Value::Float(text.parse().unwrap_or(0.0))),
            })
        }),
    ];

    let mut out = Vec::new();
    let err = encode_stream("a,b\n1,2\n3,oops\n".as_bytes(), b',', columns, &mut out, || true)
        .unwrap_err();

    assert!(matches!(
        err,
        Error::TypeMismatch { ref column, expected: DataType::Float, found: DataType::String }
            if column == "b"
    ));
    // Only the first row made it out.
    assert_eq!(floats_from_bytes(&out).unwrap(), vec![1.0, 2.0]);
}

#[test]
fn column_that_is_always_null_fails_the_run() {
    let columns =
        parse_transforms(r#"[{ "name": "x", "dataType": "float", "source": "x" }]"#).unwrap();
    let err = encode_stream("x\n\n\n".as_bytes(), b',', columns, Vec::new(), || true);
    // Blank lines are not records, so the column saw no values at all.
    assert!(matches!(err, Err(Error::UnresolvedColumn(name)) if name == "x"));
}
