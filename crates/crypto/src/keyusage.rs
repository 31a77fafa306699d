//! Hand-rolled X.509 key-usage extension.
//!
//! The key-usage value is a bitmask where bit 0 is digitalSignature.
//! The ASN.1 BIT STRING convention puts bit 0 in the most significant
//! position of the first byte, so each mask byte is bit-reversed and
//! trailing zero bits are trimmed from the reported bit length.

use der::asn1::{BitString, ObjectIdentifier, OctetString};
use der::{Decode as _, Encode as _};
use x509_cert::ext::Extension;

use mdmsim_core::Result;

use crate::crypto_err;

/// id-ce-keyUsage.
pub const OID_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.15");

/// digitalSignature bit of the key-usage mask.
pub const KEY_USAGE_DIGITAL_SIGNATURE: u16 = 1 << 0;
/// keyEncipherment bit of the key-usage mask.
pub const KEY_USAGE_KEY_ENCIPHERMENT: u16 = 1 << 2;

fn reverse_bits_in_a_byte(b: u8) -> u8 {
    let b = b >> 4 | b << 4;
    let b = b >> 2 & 0x33 | b << 2 & 0xcc;
    b >> 1 & 0x55 | b << 1 & 0xaa
}

/// Number of significant bits, counting down from the last set bit.
fn asn1_bit_length(bytes: &[u8]) -> usize {
    let mut bit_len = bytes.len() * 8;
    for i in 0..bytes.len() {
        let b = bytes[bytes.len() - i - 1];
        for bit in 0..8 {
            if (b >> bit) & 1 == 1 {
                return bit_len;
            }
            bit_len -= 1;
        }
    }
    0
}

/// Build the critical key-usage extension for a usage bitmask.
pub fn key_usage_extension(key_usage: u16) -> Result<Extension> {
    let reversed = [
        reverse_bits_in_a_byte((key_usage & 0xff) as u8),
        reverse_bits_in_a_byte((key_usage >> 8) as u8),
    ];
    let len = if reversed[1] != 0 { 2 } else { 1 };

    let bit_len = asn1_bit_length(&reversed[..len]);
    let bytes = &reversed[..bit_len.div_ceil(8)];
    let unused = (bytes.len() * 8 - bit_len) as u8;

    let value = BitString::new(unused, bytes.to_vec()).map_err(crypto_err)?;
    Ok(Extension {
        extn_id: OID_KEY_USAGE,
        critical: true,
        extn_value: OctetString::new(value.to_der().map_err(crypto_err)?).map_err(crypto_err)?,
    })
}

/// Decode a key-usage extension value back to its bitmask.
pub fn decode_key_usage(extn_value: &[u8]) -> Result<u16> {
    let bits = BitString::from_der(extn_value).map_err(crypto_err)?;
    let mut mask = 0u16;
    for (i, byte) in bits.raw_bytes().iter().take(2).enumerate() {
        mask |= (reverse_bits_in_a_byte(*byte) as u16) << (8 * i);
    }
    Ok(mask)
}
