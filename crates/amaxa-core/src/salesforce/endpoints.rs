//! Salesforce endpoint URL builders

/// Base of the versioned REST data API
pub fn data_url(instance_url: &str, api_version: &str) -> String {
    format!(
        "{}/services/data/v{}",
        instance_url.trim_end_matches('/'),
        api_version
    )
}

/// Build global describe URL
pub fn sobjects_url(instance_url: &str, api_version: &str) -> String {
    format!("{}/sobjects", data_url(instance_url, api_version))
}

/// Build sObject describe URL
pub fn describe_url(instance_url: &str, api_version: &str, sobject: &str) -> String {
    format!(
        "{}/sobjects/{}/describe",
        data_url(instance_url, api_version),
        sobject
    )
}

/// Build queryAll URL
pub fn query_all_url(instance_url: &str, api_version: &str, soql: &str) -> String {
    format!(
        "{}/queryAll?q={}",
        data_url(instance_url, api_version),
        urlencoding::encode(soql)
    )
}

/// Resolve a `nextRecordsUrl` returned by a query against the instance
pub fn next_records_url(instance_url: &str, path: &str) -> String {
    format!("{}{}", instance_url.trim_end_matches('/'), path)
}

/// Build sObject Collections URL
pub fn composite_sobjects_url(instance_url: &str, api_version: &str) -> String {
    format!("{}/composite/sobjects", data_url(instance_url, api_version))
}

/// Build SOAP partner login URL
pub fn soap_login_url(login_url: &str, api_version: &str) -> String {
    format!(
        "{}/services/Soap/u/{}",
        login_url.trim_end_matches('/'),
        api_version
    )
}
