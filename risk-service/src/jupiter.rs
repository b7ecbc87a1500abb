use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use backoff::backoff::Constant;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use marginfi_risk_engine::actions::StaticMessage;
use marginfi_risk_types::types::Pubkey;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey as SolanaPubkey,
};
use tracing::error;

use crate::{retry::retry_limited, serde_helpers::field_as_string, ServiceError, ServiceResult};

pub const QUOTE_RETRY_ATTEMPTS: usize = 5;
pub const QUOTE_RETRY_DELAY: Duration = Duration::from_millis(1500);

#[derive(Serialize, Deserialize, Default, PartialEq, Eq, Clone, Copy, Debug)]
pub enum SwapMode {
    #[default]
    ExactIn,
    ExactOut,
}

impl FromStr for SwapMode {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ExactIn" => Ok(Self::ExactIn),
            "ExactOut" => Ok(Self::ExactOut),
            _ => Err(ServiceError::Decode(format!("swap mode {s:?}"))),
        }
    }
}

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount for `ExactIn`, output amount for `ExactOut`, in native units.
    #[serde(with = "field_as_string")]
    pub amount: u64,
    pub swap_mode: Option<SwapMode>,
    pub slippage_bps: u16,
    pub platform_fee_bps: Option<u8>,
    pub only_direct_routes: Option<bool>,
    pub max_accounts: Option<usize>,
}

impl QuoteRequest {
    pub fn new(
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        swap_mode: SwapMode,
    ) -> Self {
        Self {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            amount,
            swap_mode: Some(swap_mode),
            ..Default::default()
        }
    }

    pub fn with_slippage_bps(mut self, slippage_bps: u16) -> Self {
        self.slippage_bps = slippage_bps;
        self
    }

    pub fn with_max_accounts(mut self, max_accounts: Option<usize>) -> Self {
        self.max_accounts = max_accounts;
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformFee {
    #[serde(with = "field_as_string")]
    pub amount: u64,
    pub fee_bps: u8,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub input_mint: String,
    #[serde(with = "field_as_string")]
    pub in_amount: u64,
    pub output_mint: String,
    #[serde(with = "field_as_string")]
    pub out_amount: u64,
    /// Minimum out for `ExactIn` and maximum in for `ExactOut`, after slippage.
    #[serde(with = "field_as_string")]
    pub other_amount_threshold: u64,
    pub swap_mode: SwapMode,
    pub slippage_bps: u16,
    pub platform_fee: Option<PlatformFee>,
    pub price_impact_pct: String,
    pub route_plan: Vec<RoutePlanStep>,
    #[serde(default)]
    pub context_slot: u64,
    #[serde(default)]
    pub time_taken: f64,
}

impl QuoteResponse {
    /// Price impact as a fraction, `0.01` for one percent. Unparseable values read as zero.
    pub fn price_impact(&self) -> f64 {
        self.price_impact_pct.parse().unwrap_or(0.0)
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlanStep {
    pub swap_info: SwapInfo,
    pub percent: u8,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwapInfo {
    pub amm_key: String,
    pub label: String,
    pub input_mint: String,
    pub output_mint: String,
    #[serde(with = "field_as_string")]
    pub in_amount: u64,
    #[serde(with = "field_as_string")]
    pub out_amount: u64,
    #[serde(with = "field_as_string")]
    pub fee_amount: u64,
    pub fee_mint: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct SwapInstructionsRequest<'a> {
    user_public_key: String,
    quote_response: &'a QuoteResponse,
    wrap_and_unwrap_sol: bool,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct JsonAccountMeta {
    pubkey: String,
    is_signer: bool,
    is_writable: bool,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct JsonInstruction {
    program_id: String,
    accounts: Vec<JsonAccountMeta>,
    /// base64
    data: String,
}

impl TryFrom<JsonInstruction> for Instruction {
    type Error = ServiceError;

    fn try_from(ix: JsonInstruction) -> Result<Self, Self::Error> {
        let parse = |s: &str| {
            s.parse::<SolanaPubkey>()
                .map_err(|e| ServiceError::Decode(format!("instruction key {s}: {e}")))
        };

        Ok(Instruction {
            program_id: parse(&ix.program_id)?,
            accounts: ix
                .accounts
                .iter()
                .map(|meta| {
                    Ok(AccountMeta {
                        pubkey: parse(&meta.pubkey)?,
                        is_signer: meta.is_signer,
                        is_writable: meta.is_writable,
                    })
                })
                .collect::<ServiceResult<_>>()?,
            data: STANDARD
                .decode(&ix.data)
                .map_err(|e| ServiceError::Decode(format!("instruction data: {e}")))?,
        })
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct SwapInstructionsResponse {
    #[serde(default)]
    setup_instructions: Vec<JsonInstruction>,
    swap_instruction: JsonInstruction,
    cleanup_instruction: Option<JsonInstruction>,
    #[serde(default)]
    address_lookup_table_addresses: Vec<String>,
}

/// Decoded swap leg of a composed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapInstructions {
    pub setup: Vec<Instruction>,
    pub swap: Instruction,
    pub cleanup: Option<Instruction>,
    pub lookup_table_addresses: Vec<Pubkey>,
}

impl SwapInstructions {
    pub fn into_instructions(self) -> Vec<Instruction> {
        let mut ixs = self.setup;
        ixs.push(self.swap);
        ixs.extend(self.cleanup);
        ixs
    }
}

impl TryFrom<SwapInstructionsResponse> for SwapInstructions {
    type Error = ServiceError;

    fn try_from(response: SwapInstructionsResponse) -> Result<Self, Self::Error> {
        Ok(SwapInstructions {
            setup: response
                .setup_instructions
                .into_iter()
                .map(Instruction::try_from)
                .collect::<ServiceResult<_>>()?,
            swap: response.swap_instruction.try_into()?,
            cleanup: response.cleanup_instruction.map(TryInto::try_into).transpose()?,
            lookup_table_addresses: response
                .address_lookup_table_addresses
                .iter()
                .map(|s| {
                    s.parse()
                        .map_err(|e| ServiceError::Decode(format!("lookup table {s}: {e}")))
                })
                .collect::<ServiceResult<_>>()?,
        })
    }
}

/// Swap aggregator surface used by flash-loan planning.
#[async_trait]
pub trait SwapProvider: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> ServiceResult<QuoteResponse>;

    async fn swap_instructions(
        &self,
        quote: &QuoteResponse,
        user: &Pubkey,
    ) -> ServiceResult<SwapInstructions>;
}

#[derive(Clone)]
pub struct JupiterSwapApiClient {
    pub base_path: String,
    client: Client,
}

impl JupiterSwapApiClient {
    pub fn new(base_path: String) -> Self {
        Self {
            base_path,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl SwapProvider for JupiterSwapApiClient {
    async fn quote(&self, quote_request: &QuoteRequest) -> ServiceResult<QuoteResponse> {
        let query = serde_qs::to_string(quote_request)?;
        let response = self
            .client
            .get(format!("{}/quote?{query}", self.base_path))
            .send()
            .await?;
        check_status_code_and_deserialize(response).await
    }

    async fn swap_instructions(
        &self,
        quote: &QuoteResponse,
        user: &Pubkey,
    ) -> ServiceResult<SwapInstructions> {
        let response = self
            .client
            .post(format!("{}/swap-instructions", self.base_path))
            .json(&SwapInstructionsRequest {
                user_public_key: user.to_string(),
                quote_response: quote,
                wrap_and_unwrap_sol: true,
            })
            .send()
            .await?;

        check_status_code_and_deserialize::<SwapInstructionsResponse>(response)
            .await?
            .try_into()
    }
}

async fn check_is_success(response: Response) -> ServiceResult<Response> {
    if !response.status().is_success() {
        return Err(ServiceError::Status {
            status: response.status().as_u16(),
            body: response.text().await.unwrap_or_default(),
        });
    }
    Ok(response)
}

async fn check_status_code_and_deserialize<T: DeserializeOwned>(
    response: Response,
) -> ServiceResult<T> {
    check_is_success(response)
        .await?
        .json::<T>()
        .await
        .map_err(Into::into)
}

/// Quotes with up to `max_attempts` attempts, `delay` apart. Exhausting them fails with the
/// quote-failed message.
pub async fn get_swap_quote_with_retry<P: SwapProvider + ?Sized>(
    provider: &P,
    request: &QuoteRequest,
    max_attempts: usize,
    delay: Duration,
) -> ServiceResult<QuoteResponse> {
    retry_limited(Constant::new(delay), max_attempts, "Swap quote", || {
        provider.quote(request)
    })
    .await
    .map_err(|e| {
        error!("Failed to get a quote after {} attempts: {}", max_attempts, e);
        ServiceError::action(StaticMessage::JupQuoteFailed)
    })
}
