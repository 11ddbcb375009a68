use anyhow::{Context, Result};
use bytes::{BufMut, Bytes};

use crate::{
    error::RtpCodecError,
    packet_buffer::{PacketBuffer, PacketBufferMut},
};

/// The two wire forms a header extension element can take.  A whole extension block uses a single
/// form, signaled by the cookie in the generic extension header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeaderExtensionForm {
    OneByte,
    TwoByte,
}

impl HeaderExtensionForm {
    pub const ONE_BYTE_COOKIE: u16 = 0xBEDE;
    pub const TWO_BYTE_COOKIE: u16 = 0x1000;
    // The low 4 bits of the two-byte cookie are 'appbits'
    const TWO_BYTE_COOKIE_MASK: u16 = 0xFFF0;

    pub fn cookie(&self) -> u16 {
        match self {
            HeaderExtensionForm::OneByte => Self::ONE_BYTE_COOKIE,
            HeaderExtensionForm::TwoByte => Self::TWO_BYTE_COOKIE,
        }
    }

    pub fn from_cookie(cookie: u16) -> Option<HeaderExtensionForm> {
        if cookie == Self::ONE_BYTE_COOKIE {
            Some(HeaderExtensionForm::OneByte)
        } else if (cookie & Self::TWO_BYTE_COOKIE_MASK) == Self::TWO_BYTE_COOKIE {
            Some(HeaderExtensionForm::TwoByte)
        } else {
            None
        }
    }

    /// Size of the per-element header (id and length) in this form
    pub fn element_header_size_bytes(&self) -> usize {
        match self {
            HeaderExtensionForm::OneByte => 1,
            HeaderExtensionForm::TwoByte => 2,
        }
    }
}

/// A single RTP header extension element: a local identifier and its data.
///
/// https://datatracker.ietf.org/doc/html/rfc8285#section-4.2
/// One Byte Header
///
/// ```text
///        0
///        0 1 2 3 4 5 6 7
///       +-+-+-+-+-+-+-+-+
///       |  ID   |  len  |
///       +-+-+-+-+-+-+-+-+
/// ```
///
///    The 4-bit ID is the local identifier of this element in the range
///    1-14 inclusive.  The local identifier value 15 is reserved.
///
///    The 4-bit length is the number, minus one, of data bytes of this
///    header extension element following the one-byte header.
///
/// https://datatracker.ietf.org/doc/html/rfc8285#section-4.3
/// Two Byte Header
///
/// ```text
///        0                   1
///        0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
///       +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///       |       ID      |     length    |
///       +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
///    The 8-bit ID is the local identifier of this element in the range
///    1-255 inclusive.
///
///    The 8-bit length field is the length of extension data in bytes, not
///    including the ID and length fields.  The value zero (0) indicates
///    that there is no subsequent data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderExtension {
    id: u8,
    data: Bytes,
}

impl HeaderExtension {
    pub const ONE_BYTE_MAX_ID: u8 = 14;
    /// Reserved in the one-byte form; never written as an element id.
    pub const ONE_BYTE_RESERVED_ID: u8 = 15;
    pub const ONE_BYTE_MAX_DATA_LEN: usize = 16;
    pub const TWO_BYTE_MAX_DATA_LEN: usize = 255;

    /// Create a new extension.  Id 0 is padding in both wire forms and can't be used, and the data
    /// has to fit in the two-byte form's 8-bit length field.
    pub fn new<T: Into<Bytes>>(id: u8, data: T) -> Result<HeaderExtension, RtpCodecError> {
        let data = data.into();
        if id == 0 {
            return Err(RtpCodecError::InvalidExtensionValue(
                "id 0 is reserved for padding".to_owned(),
            ));
        }
        if data.len() > Self::TWO_BYTE_MAX_DATA_LEN {
            return Err(RtpCodecError::InvalidExtensionValue(format!(
                "extension {id} has {} bytes of data, the max is {}",
                data.len(),
                Self::TWO_BYTE_MAX_DATA_LEN
            )));
        }
        Ok(HeaderExtension { id, data })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The narrowest form this extension can be written in.
    pub fn form(&self) -> HeaderExtensionForm {
        if self.fits_one_byte_form() {
            HeaderExtensionForm::OneByte
        } else {
            HeaderExtensionForm::TwoByte
        }
    }

    fn fits_one_byte_form(&self) -> bool {
        (1..=Self::ONE_BYTE_MAX_ID).contains(&self.id)
            && (1..=Self::ONE_BYTE_MAX_DATA_LEN).contains(&self.data.len())
    }

    /// The number of bytes this extension takes up when written in `form`.
    pub fn size_bytes_as(&self, form: HeaderExtensionForm) -> usize {
        form.element_header_size_bytes() + self.data.len()
    }

    /// Write this extension to `buf` in the given form.
    pub fn write_as<B: BufMut>(&self, form: HeaderExtensionForm, buf: &mut B) -> Result<()> {
        buf.ensure_space(self.size_bytes_as(form))
            .with_context(|| format!("header extension {}", self.id))?;
        match form {
            HeaderExtensionForm::OneByte => {
                if !self.fits_one_byte_form() {
                    return Err(RtpCodecError::InvalidExtensionValue(format!(
                        "extension {} with {} bytes of data can't be written in the one-byte form",
                        self.id,
                        self.data.len()
                    ))
                    .into());
                }
                // The length field holds the number of data bytes minus one
                buf.put_u8((self.id << 4) | (self.data.len() as u8 - 1));
            }
            HeaderExtensionForm::TwoByte => {
                buf.put_u8(self.id);
                buf.put_u8(self.data.len() as u8);
            }
        }
        buf.put_slice(&self.data);
        Ok(())
    }

    /// Read a single extension element in the given form.  [`buf`] should start at the element's
    /// id; on success it's left just past the element's data.
    pub fn read_as<B: PacketBuffer>(
        form: HeaderExtensionForm,
        buf: &mut B,
    ) -> Result<HeaderExtension> {
        let (id, data_length_bytes) = match form {
            HeaderExtensionForm::OneByte => {
                let id_len = buf.read_u8().context("id/len")?;
                ((id_len & 0xF0) >> 4, ((id_len & 0x0F) + 1) as usize)
            }
            HeaderExtensionForm::TwoByte => {
                let id = buf.read_u8().context("id")?;
                let length = buf.read_u8().context("length")?;
                (id, length as usize)
            }
        };
        if buf.remaining() < data_length_bytes {
            return Err(RtpCodecError::MalformedExtension {
                length_field_bytes: data_length_bytes,
                buf_remaining_bytes: buf.remaining(),
            })
            .with_context(|| format!("data of header extension {id}"));
        }
        let data = buf.read_bytes(data_length_bytes)?;
        Ok(HeaderExtension { id, data })
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_one_byte_header_extension_read() {
        #[rustfmt::skip]
        let mut buf = Cursor::new(vec![
            0x10u8, 0xFF, 0x00, 0x00
        ]);

        let he = HeaderExtension::read_as(HeaderExtensionForm::OneByte, &mut buf).unwrap();
        assert_eq!(he.id(), 1);
        assert_eq!(he.data(), &[0xFF]);
        assert_eq!(buf.position(), 2);
    }

    #[test]
    fn test_two_byte_header_extension_read() {
        #[rustfmt::skip]
        let mut buf = Cursor::new(vec![
            0x01u8, 0x01, 0xFF, 0x00, 0x00
        ]);
        let he = HeaderExtension::read_as(HeaderExtensionForm::TwoByte, &mut buf).unwrap();
        assert_eq!(he.id(), 1);
        assert_eq!(he.data(), &[0xFF]);
        assert_eq!(buf.position(), 3);
    }

    #[test]
    fn test_two_byte_header_extension_read_empty_data() {
        let mut buf = Cursor::new(vec![0x20u8, 0x00]);
        let he = HeaderExtension::read_as(HeaderExtensionForm::TwoByte, &mut buf).unwrap();
        assert_eq!(he.id(), 0x20);
        assert!(he.data().is_empty());
    }

    #[test]
    fn test_read_length_exceeds_buffer() {
        // id 2, length field says 4 bytes but only 2 are there
        let mut buf = Cursor::new(vec![0x23u8, 0xDE, 0xAD]);
        let err = HeaderExtension::read_as(HeaderExtensionForm::OneByte, &mut buf).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RtpCodecError>(),
            Some(&RtpCodecError::MalformedExtension {
                length_field_bytes: 4,
                buf_remaining_bytes: 2
            })
        );
    }

    #[test]
    fn test_write_one_byte() {
        let he = HeaderExtension::new(3, vec![0xDEu8, 0xAD]).unwrap();
        let mut buf = Vec::new();
        he.write_as(HeaderExtensionForm::OneByte, &mut buf).unwrap();
        assert_eq!(buf, vec![0x31, 0xDE, 0xAD]);
        assert_eq!(buf.len(), he.size_bytes_as(HeaderExtensionForm::OneByte));
    }

    #[test]
    fn test_write_two_byte() {
        let he = HeaderExtension::new(3, vec![0xDEu8, 0xAD]).unwrap();
        let mut buf = Vec::new();
        he.write_as(HeaderExtensionForm::TwoByte, &mut buf).unwrap();
        assert_eq!(buf, vec![0x03, 0x02, 0xDE, 0xAD]);
    }

    #[test]
    fn test_write_one_byte_when_it_doesnt_fit() {
        let he = HeaderExtension::new(20, vec![0x42u8]).unwrap();
        assert_eq!(he.form(), HeaderExtensionForm::TwoByte);
        let mut buf = Vec::new();
        let err = he
            .write_as(HeaderExtensionForm::OneByte, &mut buf)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RtpCodecError>(),
            Some(RtpCodecError::InvalidExtensionValue(_))
        ));
    }

    #[test]
    fn test_form_selection() {
        assert_eq!(
            HeaderExtension::new(14, vec![0u8; 16]).unwrap().form(),
            HeaderExtensionForm::OneByte
        );
        assert_eq!(
            HeaderExtension::new(15, vec![0u8; 1]).unwrap().form(),
            HeaderExtensionForm::TwoByte
        );
        assert_eq!(
            HeaderExtension::new(1, vec![0u8; 17]).unwrap().form(),
            HeaderExtensionForm::TwoByte
        );
        // Zero-length data can't be represented in the one-byte form
        assert_eq!(
            HeaderExtension::new(1, Bytes::new()).unwrap().form(),
            HeaderExtensionForm::TwoByte
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            HeaderExtension::new(0, vec![0x42u8]),
            Err(RtpCodecError::InvalidExtensionValue(_))
        ));
        assert!(matches!(
            HeaderExtension::new(1, vec![0u8; 256]),
            Err(RtpCodecError::InvalidExtensionValue(_))
        ));
    }

    #[test]
    fn test_cookies() {
        assert_eq!(
            HeaderExtensionForm::from_cookie(0xBEDE),
            Some(HeaderExtensionForm::OneByte)
        );
        assert_eq!(
            HeaderExtensionForm::from_cookie(0x1000),
            Some(HeaderExtensionForm::TwoByte)
        );
        // appbits are ignored
        assert_eq!(
            HeaderExtensionForm::from_cookie(0x100F),
            Some(HeaderExtensionForm::TwoByte)
        );
        assert_eq!(HeaderExtensionForm::from_cookie(0x1234), None);
    }
}
