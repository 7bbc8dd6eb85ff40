use rawreq::parser::{HttpFileParser, LoadValue};
use std::fs;
use tempfile::TempDir;

const API_FILE: &str = r#"### tab: "Orders API" ###
@base = https://shop.test
@env.dev.base = http://localhost:4000
@env.prod.base = https://shop.example

### name: login ###
### group: auth ###
POST {{base}}/login
Content-Type: application/json

{"user": "ada"}

> {
  setVar("token", response.json.token);
}

###
@name orders
@depends login
@timeout 15s
GET {{base}}/orders
Authorization: Bearer {{token}}
< {
  setHeader("X-Trace", "1");
}

### Load
@name hot
@load users=10 duration=30s rampUp=5s failureRateThreshold=5%
GET {{base}}/health

### ##################
"#;

#[test]
fn test_parse_file_from_disk() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("orders.http");
    fs::write(&path, API_FILE).unwrap();

    let parsed = HttpFileParser::parse_file(&path).unwrap();
    assert_eq!(parsed.source_path.as_deref(), Some(path.as_path()));
    assert_eq!(parsed.file_display_name.as_deref(), Some("Orders API"));
    assert_eq!(parsed.variables["base"], "https://shop.test");
    assert_eq!(parsed.environments["dev"]["base"], "http://localhost:4000");
    assert_eq!(parsed.environments["prod"]["base"], "https://shop.example");
    assert_eq!(parsed.groups, vec!["auth"]);
    assert_eq!(parsed.requests.len(), 3);

    let login = &parsed.requests[0];
    assert_eq!(login.name(), Some("login"));
    assert_eq!(login.group.as_deref(), Some("auth"));
    assert_eq!(login.body.as_deref(), Some(r#"{"user": "ada"}"#));
    assert!(login.post_script.as_deref().unwrap().starts_with("> {"));
    assert!(login.pre_script.is_none());

    let orders = &parsed.requests[1];
    assert_eq!(orders.depends.as_deref(), Some("login"));
    assert_eq!(orders.options.timeout, Some(15));
    assert_eq!(orders.headers["Authorization"], "Bearer {{token}}");
    assert!(orders.pre_script.is_some());
    assert!(orders.body.is_none());

    let hot = &parsed.requests[2];
    let load = hot.load_test.as_ref().unwrap();
    assert_eq!(load.get_int("concurrent"), Some(10));
    assert_eq!(load.get("duration"), Some(&LoadValue::Text("30s".to_string())));
    assert_eq!(load.get_text("rampUp").as_deref(), Some("5s"));
    assert_eq!(load.get_text("failureRateThreshold").as_deref(), Some("5%"));
}

#[test]
fn test_parsed_file_serializes_for_json_output() {
    let parsed = rawreq::parse_content(API_FILE);
    let json = serde_json::to_value(&parsed).unwrap();

    assert_eq!(json["fileDisplayName"], "Orders API");
    assert_eq!(json["requests"][1]["depends"], "login");
    assert_eq!(json["requests"][0]["method"], "POST");
    assert!(json.get("sourcePath").is_none());
}

#[test]
fn test_missing_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    assert!(HttpFileParser::parse_file(temp_dir.path().join("nope.http")).is_err());
}
