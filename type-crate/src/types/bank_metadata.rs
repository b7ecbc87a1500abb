use serde::{Deserialize, Serialize};

/// Off-chain descriptive data for a bank, as published in the bank-metadata cache file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankMetadata {
    pub token_address: String,
    pub token_name: String,
    pub token_symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_vote_account: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_cache_entry() {
        let raw = r#"{
            "tokenAddress": "So11111111111111111111111111111111111111112",
            "tokenName": "Wrapped SOL",
            "tokenSymbol": "SOL"
        }"#;

        let meta: BankMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(meta.token_symbol, "SOL");
        assert_eq!(meta.validator_vote_account, None);
    }
}
