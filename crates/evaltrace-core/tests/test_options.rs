//! Options as supplied by callers in JSON form.

use evaltrace_core::prelude::*;
use pretty_assertions::assert_eq;

#[test]
fn test_full_document() {
    let json = r#"{
        "trace_record": true,
        "trace_record_grad": false,
        "trace_record_hess": false,
        "trace_record_res": true,
        "trace_record_sres": true,
        "trace_record_chi2": false,
        "trace_record_schi2": true,
        "flush_interval": 25,
        "storage_file": "runs/{id}/trace.json"
    }"#;
    let options = HistoryOptions::from_json(json).unwrap();

    let expected = HistoryOptions::new()
        .with_trace_record(true)
        .with_record(Quantity::Grad, false)
        .with_record(Quantity::Hess, false)
        .with_record(Quantity::Chi2, false)
        .with_flush_interval(25)
        .with_storage_file("runs/{id}/trace.json");
    assert_eq!(options, expected);
    assert_eq!(
        options.storage_file_for("12").as_deref(),
        Some("runs/12/trace.json")
    );
}

#[test]
fn test_serialized_defaults_parse_back() {
    let defaults = HistoryOptions::default();
    let json = serde_json::to_string(&defaults).unwrap();
    assert_eq!(HistoryOptions::from_json(&json).unwrap(), defaults);
}

#[test]
fn test_empty_storage_file_rejected() {
    let err = HistoryOptions::from_json(r#"{"storage_file": ""}"#).unwrap_err();
    assert!(matches!(
        err,
        HistoryError::InvalidConfiguration { ref option, .. } if option == "storage_file"
    ));
}
