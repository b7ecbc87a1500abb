use bytemuck::{Pod, Zeroable};
use fixed::types::I80F48;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter};

/// Byte-stable storage for an `I80F48`, the form every fixed-point field takes inside the
/// account and bank types.
#[repr(C, align(8))]
#[derive(Clone, Copy, Pod, Zeroable, Default)]
pub struct WrappedI80F48 {
    pub value: [u8; 16],
}

impl Debug for WrappedI80F48 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", I80F48::from_le_bytes(self.value))
    }
}

impl Display for WrappedI80F48 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", I80F48::from_le_bytes(self.value))
    }
}

impl From<I80F48> for WrappedI80F48 {
    fn from(i: I80F48) -> Self {
        Self {
            value: i.to_le_bytes(),
        }
    }
}

impl From<WrappedI80F48> for I80F48 {
    fn from(w: WrappedI80F48) -> Self {
        Self::from_le_bytes(w.value)
    }
}

impl PartialEq for WrappedI80F48 {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for WrappedI80F48 {}

/// Decimal string on the wire, so JSON consumers never see binary fractions.
impl Serialize for WrappedI80F48 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&I80F48::from(*self))
    }
}

impl<'de> Deserialize<'de> for WrappedI80F48 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<I80F48>()
            .map(Into::into)
            .map_err(|e| de::Error::custom(format!("invalid fixed-point value {s:?}: {e}")))
    }
}
