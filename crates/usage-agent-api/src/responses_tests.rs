use super::*;

#[test]
fn report_response_accepted_reports_accepted_status() {
    let response = ReportResponse::accepted();
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["status"], "accepted");
}

#[test]
fn health_response_defaults_to_ok() {
    let response = HealthResponse::default();
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["status"], "ok");
}
