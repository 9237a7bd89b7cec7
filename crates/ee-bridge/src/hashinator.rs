//! Partition routing.
//!
//! A [`Hashinator`] maps values to partitions under one
//! [`PartitionConfig`]:
//!
//! - **Legacy**: integers use their Euclidean remainder, every other value
//!   its SipHash-1-3 hash, modulo the partition count. NULL goes to
//!   partition 0.
//! - **Elastic**: the value's 32-bit token is looked up on a sorted token
//!   ring. The owner is the last ring token at or below it, wrapping to
//!   the highest token for values below the first one.
//!
//! The same functions are used by the bridge for local routing and by
//! engines that hash on request, so both sides always agree.

use std::hash::Hasher;

use bytes::Buf;
use ee_common::types::PartitionId;
use siphasher::sip::SipHasher13;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::wire::{HashinatorType, PartitionConfig, Value};

const HASH_KEY_0: u64 = 0x6565_5f62_7269_6467;
const HASH_KEY_1: u64 = 0x655f_6861_7368_0001;

/// Hashes a value's canonical bytes.
///
/// Integers of every width hash as their big-endian `i64`, so the same
/// number always lands in the same place regardless of column type.
#[must_use]
pub fn value_hash(value: &Value) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(HASH_KEY_0, HASH_KEY_1);
    if let Some(n) = value.as_i64() {
        hasher.write(&n.to_be_bytes());
    } else {
        match value {
            Value::Float(f) => hasher.write(&f.to_bits().to_be_bytes()),
            Value::String(s) => hasher.write(s.as_bytes()),
            Value::VarBinary(b) => hasher.write(b),
            _ => {}
        }
    }
    hasher.finish()
}

/// Returns a value's position on an elastic token ring.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn value_token(value: &Value) -> i32 {
    (value_hash(value) >> 32) as u32 as i32
}

/// Returns the legacy partition of `value` among `partitions` partitions.
///
/// `partitions` must be positive.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn legacy_partition(value: &Value, partitions: i32) -> i32 {
    debug_assert!(partitions > 0);
    let n = i64::from(partitions.max(1));
    let slot = match value {
        Value::Null => 0,
        v => match v.as_i64() {
            Some(i) => i.rem_euclid(n),
            None => (value_hash(v) % n.unsigned_abs()) as i64,
        },
    };
    slot as i32
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PartitionMap {
    Legacy { partitions: i32 },
    Elastic { tokens: Vec<i32>, owners: Vec<PartitionId> },
}

/// The active partition configuration and the routing it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hashinator {
    config: PartitionConfig,
    map: PartitionMap,
}

impl Hashinator {
    /// Builds a hashinator, validating the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the config bytes do not describe a
    /// usable map: a non-positive partition count, a token count that
    /// disagrees with `num_tokens`, tokens out of order, or owners outside
    /// `[0, num_tokens)`.
    pub fn new(config: PartitionConfig) -> BridgeResult<Self> {
        let map = match config.kind {
            HashinatorType::Legacy => Self::parse_legacy(&config)?,
            HashinatorType::Elastic => Self::parse_elastic(&config)?,
        };
        debug!(
            kind = %config.kind,
            num_tokens = config.num_tokens,
            ring_pointer = config.ring_pointer,
            "Built hashinator"
        );
        Ok(Self { config, map })
    }

    fn parse_legacy(config: &PartitionConfig) -> BridgeResult<PartitionMap> {
        let mut buf = &config.config[..];
        if buf.len() != 4 {
            return Err(BridgeError::invalid_argument(format!(
                "legacy config must be 4 bytes, got {}",
                buf.len()
            )));
        }
        let partitions = buf.get_i32();
        if partitions <= 0 {
            return Err(BridgeError::invalid_argument(format!(
                "partition count {partitions} must be positive"
            )));
        }
        Ok(PartitionMap::Legacy { partitions })
    }

    fn parse_elastic(config: &PartitionConfig) -> BridgeResult<PartitionMap> {
        let mut buf = &config.config[..];
        if buf.len() < 4 {
            return Err(BridgeError::invalid_argument("elastic config is truncated"));
        }
        let count = buf.get_i32();
        if count <= 0 || count != config.num_tokens {
            return Err(BridgeError::invalid_argument(format!(
                "ring holds {count} tokens, config declares {}",
                config.num_tokens
            )));
        }
        let count = count.unsigned_abs() as usize;
        if buf.len() != count * 8 {
            return Err(BridgeError::invalid_argument(format!(
                "ring of {count} tokens needs {} bytes, got {}",
                count * 8,
                buf.len()
            )));
        }

        let mut tokens = Vec::with_capacity(count);
        let mut owners = Vec::with_capacity(count);
        for _ in 0..count {
            let token = buf.get_i32();
            let owner = buf.get_i32();
            if tokens.last().is_some_and(|prev| *prev >= token) {
                return Err(BridgeError::invalid_argument(format!(
                    "ring token {token} is out of order"
                )));
            }
            if owner < 0 || owner >= config.num_tokens {
                return Err(BridgeError::invalid_argument(format!(
                    "partition {owner} outside [0, {})",
                    config.num_tokens
                )));
            }
            tokens.push(token);
            owners.push(PartitionId::new(owner));
        }
        Ok(PartitionMap::Elastic { tokens, owners })
    }

    /// Returns the partition owning `value`.
    #[must_use]
    pub fn partition_for(&self, value: &Value) -> PartitionId {
        match &self.map {
            PartitionMap::Legacy { partitions } => {
                PartitionId::new(legacy_partition(value, *partitions))
            }
            PartitionMap::Elastic { tokens, owners } => {
                let token = value_token(value);
                let index = match tokens.partition_point(|t| *t <= token) {
                    0 => tokens.len() - 1,
                    n => n - 1,
                };
                owners[index]
            }
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Returns the kind of map.
    #[must_use]
    pub const fn kind(&self) -> HashinatorType {
        self.config.kind
    }

    /// Returns the exclusive upper bound of partition ids this map yields.
    #[must_use]
    pub const fn partition_bound(&self) -> i32 {
        match &self.map {
            PartitionMap::Legacy { partitions } => *partitions,
            PartitionMap::Elastic { .. } => self.config.num_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn ring() -> PartitionConfig {
        PartitionConfig::elastic(&[
            (i32::MIN / 2, PartitionId::new(0)),
            (0, PartitionId::new(1)),
            (i32::MAX / 2, PartitionId::new(2)),
        ])
    }

    #[test]
    fn test_legacy_integers_use_modulus() {
        let hashinator = Hashinator::new(PartitionConfig::legacy(4)).unwrap();
        assert_eq!(hashinator.partition_for(&Value::BigInt(10)), PartitionId::new(2));
        assert_eq!(hashinator.partition_for(&Value::Integer(-1)), PartitionId::new(3));
        assert_eq!(hashinator.partition_for(&Value::TinyInt(10)), PartitionId::new(2));
        assert_eq!(hashinator.partition_for(&Value::Null), PartitionId::new(0));
    }

    #[test]
    fn test_legacy_strings_are_bounded() {
        let hashinator = Hashinator::new(PartitionConfig::legacy(7)).unwrap();
        for key in ["a", "bb", "warehouse-17", ""] {
            let p = hashinator.partition_for(&Value::from(key)).as_i32();
            assert!((0..7).contains(&p));
        }
    }

    #[test]
    fn test_elastic_floor_lookup_wraps() {
        let hashinator = Hashinator::new(ring()).unwrap();
        for n in 0..200i64 {
            let value = Value::BigInt(n);
            let token = value_token(&value);
            let expected = if token < i32::MIN / 2 || token >= i32::MAX / 2 {
                2
            } else if token < 0 {
                0
            } else {
                1
            };
            assert_eq!(hashinator.partition_for(&value).as_i32(), expected);
        }
    }

    #[test]
    fn test_rejects_bad_rings() {
        let unordered = PartitionConfig::elastic(&[(5, PartitionId::new(0)), (5, PartitionId::new(1))]);
        assert!(Hashinator::new(unordered).is_err());

        let bad_owner = PartitionConfig::elastic(&[(0, PartitionId::new(0)), (9, PartitionId::new(2))]);
        assert!(Hashinator::new(bad_owner).is_err());

        let mut miscounted = ring();
        miscounted.num_tokens = 4;
        assert!(Hashinator::new(miscounted).is_err());

        assert!(Hashinator::new(PartitionConfig::legacy(0)).is_err());

        let truncated = PartitionConfig {
            config: Bytes::from_static(&[0, 0]),
            ..PartitionConfig::legacy(2)
        };
        assert!(matches!(
            Hashinator::new(truncated),
            Err(BridgeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_integer_widths_agree() {
        assert_eq!(value_hash(&Value::TinyInt(5)), value_hash(&Value::BigInt(5)));
        assert_ne!(value_hash(&Value::BigInt(5)), value_hash(&Value::from("5")));
    }
}
