use serde::Deserialize;

/// Body of a successful client-credentials token exchange.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub token_type: String,
    pub access_token: String,
}

/// One quota entry from the usages endpoint's `value` array.
///
/// The collector stores the upstream payload verbatim; this type is only
/// materialized when the artifact is projected into CSV.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub id: String,
    pub unit: String,
    pub current_value: i64,
    pub limit: i64,
    pub name: UsageName,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageName {
    pub value: String,
    pub localized_value: String,
}
