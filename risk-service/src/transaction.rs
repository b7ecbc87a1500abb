//! Glue between marginfi keys and the Solana SDK: v0 message compilation against address
//! lookup tables and the limits a composed transaction is measured by.

use marginfi_risk_types::types::Pubkey;
use solana_sdk::{
    address_lookup_table::{state::AddressLookupTable, AddressLookupTableAccount},
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    message::{v0, VersionedMessage},
    pubkey::Pubkey as SolanaPubkey,
};

use crate::{ServiceError, ServiceResult};

pub fn to_solana_pubkey(pubkey: &Pubkey) -> SolanaPubkey {
    SolanaPubkey::new_from_array(pubkey.to_bytes())
}

pub fn writable(pubkey: &Pubkey, is_signer: bool) -> AccountMeta {
    AccountMeta::new(to_solana_pubkey(pubkey), is_signer)
}

pub fn readonly(pubkey: &Pubkey, is_signer: bool) -> AccountMeta {
    AccountMeta::new_readonly(to_solana_pubkey(pubkey), is_signer)
}

/// Parses the on-chain data of the lookup table at `key`.
pub fn decode_lookup_table(
    key: &Pubkey,
    data: &[u8],
) -> ServiceResult<AddressLookupTableAccount> {
    let table = AddressLookupTable::deserialize(data)
        .map_err(|e| ServiceError::Decode(format!("lookup table {key}: {e}")))?;

    Ok(AddressLookupTableAccount {
        key: to_solana_pubkey(key),
        addresses: table.addresses.to_vec(),
    })
}

/// Compiles `instructions` with `payer` as the fee payer. The blockhash is left zeroed, the
/// caller sets a recent one before signing.
pub fn compile_v0(
    payer: &Pubkey,
    instructions: &[Instruction],
    lookup_tables: &[AddressLookupTableAccount],
) -> ServiceResult<v0::Message> {
    Ok(v0::Message::try_compile(
        &to_solana_pubkey(payer),
        instructions,
        lookup_tables,
        Hash::default(),
    )?)
}

pub trait MessageLimits {
    /// Static keys plus every key loaded through a lookup table.
    fn total_account_keys(&self) -> usize;

    /// Length of the versioned wire encoding, signatures excluded.
    fn serialized_size(&self) -> usize;
}

impl MessageLimits for v0::Message {
    fn total_account_keys(&self) -> usize {
        self.account_keys.len()
            + self
                .address_table_lookups
                .iter()
                .map(|lookup| lookup.writable_indexes.len() + lookup.readonly_indexes.len())
                .sum::<usize>()
    }

    fn serialized_size(&self) -> usize {
        VersionedMessage::V0(self.clone()).serialize().len()
    }
}
