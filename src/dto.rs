// Author: Jacques Murray

//! Wire shapes of the BCA API.

use serde::Deserialize;

/// Response of `POST /api/oauth/token`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
}

/// Body of every non-success response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorEnvelope {
    pub error_code: String,
    #[serde(default)]
    pub error_message: ErrorMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorMessage {
    #[serde(default)]
    pub indonesian: String,
    #[serde(default)]
    pub english: String,
}

/// Response of the balance information endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BalanceInformation {
    #[serde(default)]
    pub account_detail_data_success: Vec<AccountBalance>,
    #[serde(default)]
    pub account_detail_data_failed: Vec<AccountFailure>,
}

/// Amounts are decimal strings, exactly as BCA sends them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountBalance {
    pub account_number: String,
    pub currency: String,
    pub balance: String,
    pub available_balance: String,
    #[serde(default)]
    pub float_amount: String,
    #[serde(default)]
    pub hold_amount: String,
    #[serde(default)]
    pub plafon: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountFailure {
    pub account_number: String,
    #[serde(default)]
    pub indonesian: String,
    #[serde(default)]
    pub english: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_information_decodes_both_lists() {
        let body = r#"{
            "AccountDetailDataSuccess": [{
                "AccountNumber": "0201245680",
                "Currency": "IDR",
                "Balance": "19000000.00",
                "AvailableBalance": "19000000.00",
                "FloatAmount": "0.00",
                "HoldAmount": "0.00",
                "Plafon": "0.00"
            }],
            "AccountDetailDataFailed": [{
                "English": "Account not found",
                "Indonesian": "Rekening tidak ditemukan",
                "AccountNumber": "0201245681"
            }]
        }"#;

        let info: BalanceInformation = serde_json::from_str(body).unwrap();
        assert_eq!(info.account_detail_data_success.len(), 1);
        assert_eq!(info.account_detail_data_success[0].balance, "19000000.00");
        assert_eq!(info.account_detail_data_failed[0].english, "Account not found");
    }

    #[test]
    fn test_auth_token_scope_is_optional() {
        let token: AuthToken = serde_json::from_str(
            r#"{"access_token":"abc","token_type":"Bearer","expires_in":3600}"#,
        )
        .unwrap();
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.scope, "");
    }
}
