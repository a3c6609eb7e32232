//! Protocol and policy constants. All monetary values in base units (1 COIN = 10^8 units).

pub const COIN: u64 = 100_000_000;

/// Sequence number marking an input as final.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Highest sequence number that still signals BIP125 opt-in replaceability.
///
/// Any input with `sequence <= MAX_BIP125_RBF_SEQUENCE` makes the whole
/// transaction replaceable.
///
/// # Examples
///
/// ```
/// use rbf_core::constants::{MAX_BIP125_RBF_SEQUENCE, SEQUENCE_FINAL};
/// assert!(MAX_BIP125_RBF_SEQUENCE < SEQUENCE_FINAL - 1);
/// ```
pub const MAX_BIP125_RBF_SEQUENCE: u32 = 0xffff_fffd;

/// Sequence used by wallets that do not opt in to replacement. Keeps
/// lock time enforced without signalling BIP125.
pub const SEQUENCE_NO_RBF: u32 = SEQUENCE_FINAL - 1;

/// Fee rates are expressed per this many bytes.
pub const FEE_RATE_UNIT_BYTES: u64 = 1_000;

/// Minimum relay fee rate, per 1000 bytes.
pub const DEFAULT_MIN_RELAY_FEE: u64 = 1_000;

/// Minimum increase in fee rate a replacement must pay, per 1000 bytes.
pub const DEFAULT_INCREMENTAL_RELAY_FEE: u64 = 1_000;

/// Fee rate used when no override is set and no estimate is available.
pub const DEFAULT_FALLBACK_FEE: u64 = 20_000;

/// Outputs below this value are uneconomical and may not exist on their own.
pub const DEFAULT_DUST_THRESHOLD: u64 = 546;

/// Smallest change output the wallet is willing to create when bumping.
///
/// Sits one band above the dust threshold: a reduced change output landing
/// in `[DEFAULT_DUST_THRESHOLD, DEFAULT_MIN_CHANGE_VALUE)` is rejected rather
/// than folded into the fee.
pub const DEFAULT_MIN_CHANGE_VALUE: u64 = 1_000;

pub const MAX_TX_SIZE: usize = 100_000;
pub const MAX_INPUTS: usize = 1000;
pub const MAX_OUTPUTS: usize = 1000;
