//! End-to-end extract and load runs against a mock Salesforce API
//!
//! Each test writes a definition into a temporary directory, runs the command
//! against a `RestClient` pointed at a wiremock server, and checks the files
//! and requests that result.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use amaxa_cli::commands::{extract, load};
use amaxa_cli::definition::OperationDefinition;
use amaxa_cli::state::{state_path_for, StateFile};
use amaxa_cli::CliError;
use amaxa_core::load::LoadStage;
use amaxa_core::salesforce::{RestClient, SalesforceConfig};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

const DATA_PATH: &str = "/services/data/v52.0";

const ACCOUNT_1: &str = "001000000000001AAA";
const ACCOUNT_2: &str = "001000000000002AAA";
const NEW_ACCOUNT_1: &str = "001000000000101AAA";
const NEW_ACCOUNT_2: &str = "001000000000102AAA";

fn client(server: &MockServer) -> Arc<RestClient> {
    Arc::new(RestClient::new(server.uri(), "token", &SalesforceConfig::default()).unwrap())
}

fn write_definition(dir: &Path, yaml: &str) -> (PathBuf, OperationDefinition) {
    let path = dir.join("operation.yaml");
    fs::write(&path, yaml).unwrap();
    let definition = OperationDefinition::load(&path).unwrap();
    (path, definition)
}

fn field(name: &str, field_type: &str, soap_type: &str, reference_to: &[&str]) -> Value {
    json!({
        "name": name,
        "type": field_type,
        "soapType": soap_type,
        "createable": name != "Id",
        "referenceTo": reference_to,
    })
}

async fn mount_schema(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("{}/sobjects", DATA_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sobjects": [
                { "name": "Account", "keyPrefix": "001" },
                { "name": "Contact", "keyPrefix": "003" },
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}/sobjects/Account/describe", DATA_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Account",
            "keyPrefix": "001",
            "fields": [
                field("Id", "id", "tns:ID", &[]),
                field("Name", "string", "xsd:string", &[]),
                field("ParentId", "reference", "tns:ID", &["Account"]),
                field("Logo", "base64", "xsd:base64Binary", &[]),
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}/sobjects/Contact/describe", DATA_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Contact",
            "keyPrefix": "003",
            "fields": [
                field("Id", "id", "tns:ID", &[]),
                field("LastName", "string", "xsd:string", &[]),
                field("AccountId", "reference", "tns:ID", &["Account"]),
                field("OwnerId", "reference", "tns:ID", &["User"]),
            ]
        })))
        .mount(server)
        .await;
}

fn soql(request: &Request) -> String {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == "q")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_extract_writes_mapped_csv_files() {
    let server = MockServer::start().await;
    mount_schema(&server).await;

    Mock::given(method("GET"))
        .and(path(format!("{}/queryAll", DATA_PATH)))
        .respond_with(|request: &Request| {
            let q = soql(request);
            let records = if q.starts_with("SELECT Id, Name, ParentId FROM Account") {
                json!([
                    { "attributes": { "type": "Account" }, "Id": ACCOUNT_1, "Name": "Picon", "ParentId": null },
                    { "attributes": { "type": "Account" }, "Id": ACCOUNT_2, "Name": "Caprica", "ParentId": ACCOUNT_1 },
                ])
            } else if q.starts_with("SELECT AccountId, Id, LastName FROM Contact WHERE AccountId IN (") {
                json!([
                    { "attributes": { "type": "Contact" }, "Id": "003000000000001AAA", "LastName": "  Adama ", "AccountId": ACCOUNT_2 },
                ])
            } else {
                json!([])
            };
            ResponseTemplate::new(200).set_body_json(json!({ "done": true, "records": records }))
        })
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let (definition_path, definition) = write_definition(
        temp.path(),
        r#"
version: 1
operation:
  - sobject: Account
    fields: [Name, ParentId]
    extract:
      all: true
  - sobject: Contact
    fields:
      - field: LastName
        column: Surname
        transforms: [strip, uppercase]
      - AccountId
    extract:
      descendents: true
    file: contacts.csv
"#,
    );

    extract::execute(&definition_path, &definition, client(&server))
        .await
        .unwrap();

    assert_eq!(
        fs::read_to_string(temp.path().join("Account.csv")).unwrap(),
        format!(
            "Id,Name,ParentId\n{},Picon,\n{},Caprica,{}\n",
            ACCOUNT_1, ACCOUNT_2, ACCOUNT_1
        )
    );
    assert_eq!(
        fs::read_to_string(temp.path().join("contacts.csv")).unwrap(),
        format!("AccountId,Id,Surname\n{},003000000000001AAA,ADAMA\n", ACCOUNT_2)
    );
}

#[tokio::test]
async fn test_extract_reports_every_definition_error() {
    let server = MockServer::start().await;
    mount_schema(&server).await;

    let temp = TempDir::new().unwrap();
    let (definition_path, definition) = write_definition(
        temp.path(),
        r#"
version: 1
operation:
  - sobject: Account
    fields:
      - Name
      - Name
      - Logo
      - Industry
      - field: ParentId
        column: Name
    extract:
      ids: [bogus]
  - sobject: Contact
    fields:
      - field: AccountId
        self-lookup-behavior: trace-none
    extract:
      descendents: true
  - sobject: Lead
    field-group: readable
    extract:
      all: true
"#,
    );

    let err = extract::execute(&definition_path, &definition, client(&server))
        .await
        .unwrap_err();

    match err {
        CliError::InvalidDefinition(errors) => assert_eq!(
            errors,
            vec![
                "sObject Lead does not exist or is not visible.".to_string(),
                "Field Account.Name is present more than once in the operation definition.".to_string(),
                "Field Account.Logo is a base64 field, which is not supported.".to_string(),
                "Field Account.Industry does not exist or is not visible.".to_string(),
                "Field Account.ParentId is mapped to column Name, but this column is already mapped."
                    .to_string(),
                "One or more invalid Id values provided for sObject Account".to_string(),
                "Lookup behavior 'trace-none' specified for field Contact.AccountId is not valid for this lookup type."
                    .to_string(),
            ]
        ),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!temp.path().join("Account.csv").exists());
}

fn write_account_input(dir: &Path) {
    fs::write(
        dir.join("Account.csv"),
        format!(
            "Id,Name,ParentId\n{},Picon,{}\n{},Caprica,\n",
            ACCOUNT_1, ACCOUNT_2, ACCOUNT_2
        ),
    )
    .unwrap();
}

const LOAD_DEFINITION: &str = r#"
version: 1
operation:
  - sobject: Account
    fields: [Name, ParentId]
"#;

async fn mount_inserts(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("{}/composite/sobjects", DATA_PATH)))
        .respond_with(|request: &Request| {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            let results: Vec<Value> = body["records"]
                .as_array()
                .unwrap()
                .iter()
                .map(|r| {
                    assert!(r.get("Id").is_none());
                    assert!(r.get("ParentId").is_none());
                    let id = match r["Name"].as_str().unwrap() {
                        "Picon" => NEW_ACCOUNT_1,
                        _ => NEW_ACCOUNT_2,
                    };
                    json!({ "id": id, "success": true, "errors": [] })
                })
                .collect();
            ResponseTemplate::new(200).set_body_json(results)
        })
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_load_inserts_then_updates_self_lookups() {
    let server = MockServer::start().await;
    mount_schema(&server).await;
    mount_inserts(&server).await;

    Mock::given(method("PATCH"))
        .and(path(format!("{}/composite/sobjects", DATA_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": NEW_ACCOUNT_1, "success": true, "errors": [] }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    write_account_input(temp.path());
    let (definition_path, definition) = write_definition(temp.path(), LOAD_DEFINITION);

    load::execute(&definition_path, &definition, None, client(&server))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let update = requests
        .iter()
        .find(|r| r.method.as_str() == "PATCH")
        .unwrap();
    let body: Value = serde_json::from_slice(&update.body).unwrap();
    assert_eq!(body["records"][0]["Id"], NEW_ACCOUNT_1);
    assert_eq!(body["records"][0]["ParentId"], NEW_ACCOUNT_2);

    assert_eq!(
        fs::read_to_string(temp.path().join("Account-results.csv")).unwrap(),
        format!(
            "Original Id,New Id\n{},{}\n{},{}\n",
            ACCOUNT_1, NEW_ACCOUNT_1, ACCOUNT_2, NEW_ACCOUNT_2
        )
    );
    assert!(!state_path_for(&definition_path).exists());
}

#[tokio::test]
async fn test_failed_load_saves_state_and_resumes() {
    let server = MockServer::start().await;
    mount_schema(&server).await;
    mount_inserts(&server).await;

    Mock::given(method("PATCH"))
        .and(path(format!("{}/composite/sobjects", DATA_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "success": false,
            "errors": [{ "statusCode": "UNABLE_TO_LOCK_ROW", "message": "unable to obtain exclusive access", "fields": [] }]
        }])))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    write_account_input(temp.path());
    let (definition_path, definition) = write_definition(temp.path(), LOAD_DEFINITION);

    let err = load::execute(&definition_path, &definition, None, client(&server))
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .starts_with("Errors took place during dependent updates of Account:"));

    let state = StateFile::load(&state_path_for(&definition_path)).unwrap();
    assert_eq!(state.state.stage, LoadStage::DependentUpdates);
    assert_eq!(state.state.id_map.len(), 2);
    assert_eq!(state.state.id_map[ACCOUNT_1], NEW_ACCOUNT_1);

    // Resume against an org that no longer fails and must see no inserts
    let resumed = MockServer::start().await;
    mount_schema(&resumed).await;
    Mock::given(method("POST"))
        .and(path(format!("{}/composite/sobjects", DATA_PATH)))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&resumed)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("{}/composite/sobjects", DATA_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": NEW_ACCOUNT_1, "success": true, "errors": [] }
        ])))
        .expect(1)
        .mount(&resumed)
        .await;

    load::execute(&definition_path, &definition, Some(&state), client(&resumed))
        .await
        .unwrap();

    // Rows from the first run survive the resume
    assert_eq!(
        fs::read_to_string(temp.path().join("Account-results.csv")).unwrap(),
        format!(
            "Original Id,New Id\n{},{}\n{},{}\n",
            ACCOUNT_1, NEW_ACCOUNT_1, ACCOUNT_2, NEW_ACCOUNT_2
        )
    );
}

#[tokio::test]
async fn test_load_rejects_mismatched_input_file() {
    let server = MockServer::start().await;
    mount_schema(&server).await;

    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("Account.csv"), "Id,Name,Phone\n").unwrap();
    let (definition_path, definition) = write_definition(temp.path(), LOAD_DEFINITION);

    let err = load::execute(&definition_path, &definition, None, client(&server))
        .await
        .unwrap_err();

    match err {
        CliError::InvalidDefinition(errors) => assert_eq!(
            errors,
            vec![
                "Input file for sObject Account does not match the specified field scope.\nScope: Id, Name, ParentId\nFile Columns: Id, Name, Phone"
                    .to_string()
            ]
        ),
        other => panic!("unexpected error: {:?}", other),
    }
}
