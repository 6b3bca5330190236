use aegix_core::{Address, Amount};
use serde::{Deserialize, Serialize};

/// The instruction-level intent of a transaction `ChainAdapter::build_*`
/// produces, before it is signed. Kept as a typed plan rather than raw
/// bytes so `SimulatedChainAdapter` can apply it directly without a real
/// transaction codec.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum TxPlan {
    /// `S1_FundBurner` / `S2_PayRecipient`: a plain SPL-style token transfer.
    StandardTransfer {
        from: Address,
        to: Address,
        amount_micro: Amount,
        mint: String,
    },
    /// `M1_CompressedHop`: compress `amount_micro` of `mint` from `from`
    /// directly into a ZK-compressed account owned by `to`, fee paid by
    /// `from`.
    Compress {
        from: Address,
        to: Address,
        amount_micro: Amount,
        mint: String,
    },
    /// `M3_DecompressAndDeliver`: decompress the burner's compressed
    /// balance and deliver it to the recipient in one instruction, with
    /// `fee_payer` (the Recovery Pool) covering network fees so the burner
    /// never needs a native balance of its own.
    DecompressAndTransfer {
        from: Address,
        to: Address,
        amount_micro: Amount,
        mint: String,
        fee_payer: Address,
    },
    /// `CleanupScheduler`'s rent-reclaim pass: close an empty burner token
    /// account and send its rent lamports to `rent_recipient` (the pool or
    /// Recovery Pool the originating session funded it from).
    CloseAccount {
        account: Address,
        mint: String,
        rent_recipient: Address,
    },
    /// `S1_FundBurner` (Standard mode): one transaction moving both the
    /// payable-asset amount and the native units the burner will need to
    /// pay its own fees, from pool `P` to burner `B`.
    FundBurner {
        from: Address,
        to: Address,
        amount_micro: Amount,
        mint: String,
        native_amount: Amount,
    },
    /// A bare native-asset transfer, used by `S3_CloseBurner` to sweep any
    /// leftover native dust from a spent burner back to `P`.
    NativeTransfer {
        from: Address,
        to: Address,
        amount: Amount,
    },
}

/// A transaction plan bound to a specific blockhash and expiry height, ready
/// to be signed by whichever keypair the plan's `from` (or `fee_payer`)
/// resolves to.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct UnsignedTx {
    pub plan: TxPlan,
    pub blockhash: String,
    pub expires_at_block: u64,
}

impl UnsignedTx {
    /// Canonical bytes signed by the transaction's authority — bincode of
    /// the plan plus its validity window, so a signature cannot be replayed
    /// against a different blockhash.
    pub fn signing_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("UnsignedTx always serializes")
    }
}

/// A signed, submittable transaction: the plan bytes plus the Ed25519
/// signature of its authorizing keypair.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SignedTx {
    pub unsigned: UnsignedTx,
    pub signer: Address,
    pub signature: [u8; 64],
}

impl SignedTx {
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("SignedTx always serializes")
    }

    pub fn from_wire_bytes(bytes: &[u8]) -> Result<Self, aegix_core::AegixError> {
        bincode::deserialize(bytes).map_err(Into::into)
    }
}
