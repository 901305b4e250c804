//! Solana chain adapter for vx402 payment verification.
//!
//! The adapter resolves a transaction signature through a JSON-RPC node,
//! reads slot confirmations from the signature status, and pulls the USDC
//! transfer out of the jsonParsed transaction body. Both the SPL Token and
//! Token-2022 programs are recognized, and inner instructions are scanned
//! so transfers routed through a program (e.g. a payment aggregator) are
//! still found.

use std::time::Duration;

use rust_decimal::Decimal;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_signature::Signature;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::parse_instruction::ParsedInstruction;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiInstruction, UiMessage,
    UiParsedInstruction, UiTransactionEncoding,
};
use tokio::time::timeout;

use vx402::chain::{AdapterError, Chain, ChainAdapter, TxTransfer};
use vx402::config::ChainSettings;

const SPL_TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
const SPL_TOKEN_2022_PROGRAM: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

const USDC_DECIMALS: u32 = 6;

/// Read-only transaction lookup against a Solana RPC node.
pub struct SolanaAdapter {
    client: RpcClient,
    usdc_mint: String,
    payment_address: String,
    rpc_timeout: Duration,
}

impl std::fmt::Debug for SolanaAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaAdapter")
            .field("usdc_mint", &self.usdc_mint)
            .field("payment_address", &self.payment_address)
            .field("rpc_timeout", &self.rpc_timeout)
            .finish_non_exhaustive()
    }
}

impl SolanaAdapter {
    /// Builds an adapter from the chain's settings.
    ///
    /// `payment_address` is the USDC token account payments land in, as it
    /// appears in the parsed transfer's `destination` field.
    #[must_use]
    pub fn new(settings: &ChainSettings, rpc_timeout: Duration) -> Self {
        Self {
            client: RpcClient::new_with_commitment(
                settings.rpc_url.clone(),
                CommitmentConfig::confirmed(),
            ),
            usdc_mint: settings.usdc_contract.clone(),
            payment_address: settings.payment_address.clone(),
            rpc_timeout,
        }
    }

    async fn confirmations_for(&self, signature: &Signature) -> Result<u64, AdapterError> {
        let statuses = timeout(
            self.rpc_timeout,
            self.client.get_signature_statuses_with_history(&[*signature]),
        )
        .await
        .map_err(|_| AdapterError::Timeout(self.rpc_timeout))?
        .map_err(|e| AdapterError::Unavailable(e.to_string()))?;

        let status = statuses
            .value
            .into_iter()
            .next()
            .flatten()
            .ok_or(AdapterError::NotFound)?;
        if status.err.is_some() {
            return Err(AdapterError::TransactionFailed);
        }

        match status.confirmations {
            Some(n) => Ok(n as u64),
            // Rooted transactions stop reporting a count; measure against
            // the current slot instead.
            None => {
                let head = timeout(self.rpc_timeout, self.client.get_slot())
                    .await
                    .map_err(|_| AdapterError::Timeout(self.rpc_timeout))?
                    .map_err(|e| AdapterError::Unavailable(e.to_string()))?;
                Ok(head.saturating_sub(status.slot))
            }
        }
    }
}

#[async_trait::async_trait]
impl ChainAdapter for SolanaAdapter {
    fn chain(&self) -> Chain {
        Chain::Solana
    }

    async fn fetch_transaction(&self, tx_hash: &str) -> Result<TxTransfer, AdapterError> {
        let signature: Signature = tx_hash
            .parse()
            .map_err(|_| AdapterError::MalformedHash(tx_hash.to_owned()))?;

        let confirmations = self.confirmations_for(&signature).await?;

        let tx = timeout(
            self.rpc_timeout,
            self.client.get_transaction_with_config(
                &signature,
                RpcTransactionConfig {
                    encoding: Some(UiTransactionEncoding::JsonParsed),
                    commitment: Some(CommitmentConfig::confirmed()),
                    max_supported_transaction_version: Some(0),
                },
            ),
        )
        .await
        .map_err(|_| AdapterError::Timeout(self.rpc_timeout))?
        .map_err(|e| AdapterError::Unavailable(e.to_string()))?;

        if let Some(meta) = &tx.transaction.meta
            && meta.err.is_some()
        {
            return Err(AdapterError::TransactionFailed);
        }
        let slot = tx.slot;

        let instructions = collect_parsed_instructions(&tx);
        let transfer = extract_usdc_transfer(&instructions, &self.usdc_mint, &self.payment_address)
            .ok_or(AdapterError::NoTokenTransfer)?;

        tracing::debug!(
            tx_hash,
            amount = %transfer.amount,
            confirmations,
            slot,
            "fetched Solana transfer"
        );

        Ok(TxTransfer {
            from: transfer.from,
            to: transfer.to,
            amount: transfer.amount,
            currency: "USDC".to_owned(),
            confirmations,
            block_number: slot,
        })
    }
}

/// A token transfer decoded from a parsed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DecodedTransfer {
    from: String,
    to: String,
    amount: Decimal,
}

/// Flattens top-level and inner instructions into one parsed list.
fn collect_parsed_instructions(
    tx: &EncodedConfirmedTransactionWithStatusMeta,
) -> Vec<ParsedInstruction> {
    let mut out = Vec::new();

    if let EncodedTransaction::Json(ui_tx) = &tx.transaction.transaction
        && let UiMessage::Parsed(message) = &ui_tx.message
    {
        for instruction in &message.instructions {
            if let UiInstruction::Parsed(UiParsedInstruction::Parsed(parsed)) = instruction {
                out.push(parsed.clone());
            }
        }
    }

    if let Some(meta) = &tx.transaction.meta
        && let OptionSerializer::Some(inner) = &meta.inner_instructions
    {
        for set in inner {
            for instruction in &set.instructions {
                if let UiInstruction::Parsed(UiParsedInstruction::Parsed(parsed)) = instruction {
                    out.push(parsed.clone());
                }
            }
        }
    }

    out
}

/// Picks the USDC transfer paying `payment_address`, falling back to the
/// first token transfer so a wrong-recipient payment is reported with its
/// actual destination.
fn extract_usdc_transfer(
    instructions: &[ParsedInstruction],
    usdc_mint: &str,
    payment_address: &str,
) -> Option<DecodedTransfer> {
    let mut first = None;
    for instruction in instructions {
        let Some(decoded) = decode_transfer(instruction, usdc_mint) else {
            continue;
        };
        if decoded.to == payment_address {
            return Some(decoded);
        }
        first.get_or_insert(decoded);
    }
    first
}

/// Decodes one SPL `transfer` or `transferChecked` instruction.
///
/// `transferChecked` names its mint, so foreign-token transfers are skipped.
/// Plain `transfer` carries no mint; it is accepted on the token account
/// match alone, the way explorers attribute it.
fn decode_transfer(instruction: &ParsedInstruction, usdc_mint: &str) -> Option<DecodedTransfer> {
    if instruction.program_id != SPL_TOKEN_PROGRAM
        && instruction.program_id != SPL_TOKEN_2022_PROGRAM
    {
        return None;
    }

    let kind = instruction.parsed.get("type")?.as_str()?;
    let info = instruction.parsed.get("info")?;

    let base_units = match kind {
        "transferChecked" => {
            if info.get("mint")?.as_str()? != usdc_mint {
                return None;
            }
            info.get("tokenAmount")?.get("amount")?.as_str()?
        }
        "transfer" => info.get("amount")?.as_str()?,
        _ => return None,
    };
    let base_units: i128 = base_units.parse().ok()?;
    // The amount string is attacker-controlled; values past Decimal's
    // 96-bit mantissa are not a transfer worth considering.
    let amount = Decimal::try_from_i128_with_scale(base_units, USDC_DECIMALS).ok()?;

    let to = info.get("destination")?.as_str()?.to_owned();
    // Multisig transfers report `multisigAuthority`; single-signer ones
    // report `authority`; the raw source account is the last resort.
    let from = info
        .get("authority")
        .or_else(|| info.get("multisigAuthority"))
        .or_else(|| info.get("source"))?
        .as_str()?
        .to_owned();

    Some(DecodedTransfer { from, to, amount })
}
