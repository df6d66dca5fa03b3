//! Small serialization helpers built on top of `cbordata`'s `IntoCbor` /
//! `FromCbor` traits.

use cbordata::{Cbor, FromCbor, IntoCbor};

use crate::{err_at, Result};

/// Serialize `val` (any type implementing `IntoCbor`, typically via
/// `#[derive(Cborize)]`) into its CBOR byte-string.
pub fn into_cbor_bytes<T>(val: T) -> Result<Vec<u8>>
where
    T: IntoCbor,
{
    let mut data: Vec<u8> = vec![];
    let n = err_at!(
        FailCbor,
        err_at!(FailCbor, val.into_cbor())?.encode(&mut data)
    )?;
    if n != data.len() {
        err_at!(Fatal, msg: "cbor encoding len mismatch {} {}", n, data.len())
    } else {
        Ok(data)
    }
}

/// Deserialize `T` (implementing `FromCbor`) from a CBOR byte-string.
/// Returns `(value, bytes-consumed)`.
pub fn from_cbor_bytes<T>(mut data: &[u8]) -> Result<(T, usize)>
where
    T: FromCbor,
{
    let (val, n) = err_at!(FailCbor, Cbor::decode(&mut data))?;
    Ok((err_at!(FailCbor, T::from_cbor(val))?, n))
}
