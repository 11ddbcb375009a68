use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use anyhow::{Context, Result};
use bytes::{Buf, BufMut};
use tracing::{debug, trace};

use crate::{
    error::RtpCodecError,
    packet_buffer::{PacketBuffer, PacketBufferMut},
    util::{consume_padding, word_aligned},
};

use super::header_extension::{HeaderExtension, HeaderExtensionForm};

//  https://datatracker.ietf.org/doc/html/rfc3550#section-5.3.1
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |            cookie             |           length              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        header extension                       |
// |                             ....                              |
// The header extension contains a 16-bit length field that
//   counts the number of 32-bit words in the extension, excluding the
//   four-octet extension header (therefore zero is a valid length).

/// The set of header extensions in an RTP packet, keyed by id.
///
/// The wire form is decided for the block as a whole: if any extension can't be expressed in the
/// one-byte form, every extension is written in the two-byte form.
#[derive(Debug)]
pub struct HeaderExtensions {
    extensions: BTreeMap<u8, HeaderExtension>,
    // Cached size of the serialized block, SIZE_UNKNOWN when it needs to be recalculated
    size_bytes: AtomicUsize,
}

const SIZE_UNKNOWN: usize = usize::MAX;

pub static NO_EXTENSIONS: HeaderExtensions = HeaderExtensions::new();

impl Default for HeaderExtensions {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for HeaderExtensions {
    fn clone(&self) -> Self {
        Self {
            extensions: self.extensions.clone(),
            size_bytes: AtomicUsize::new(self.size_bytes.load(Ordering::Relaxed)),
        }
    }
}

impl PartialEq for HeaderExtensions {
    fn eq(&self, other: &Self) -> bool {
        self.extensions == other.extensions
    }
}

impl Eq for HeaderExtensions {}

impl HeaderExtensions {
    /// The size of the generic header (cookie + length) preceding the extension elements
    pub const HEADER_SIZE_BYTES: usize = 4;

    pub const fn new() -> Self {
        Self {
            extensions: BTreeMap::new(),
            size_bytes: AtomicUsize::new(0),
        }
    }

    /// Returns the number of header extensions
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Returns true if there are no extensions present
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn get(&self, id: u8) -> Option<&HeaderExtension> {
        self.extensions.get(&id)
    }

    /// Add a new header extension.  Returns the prior extension with the same ID, if there was one
    pub fn add(&mut self, ext: HeaderExtension) -> Option<HeaderExtension> {
        *self.size_bytes.get_mut() = SIZE_UNKNOWN;
        self.extensions.insert(ext.id(), ext)
    }

    /// Remove the header extension with the given `id`, if it existed.  Returns the removed
    /// extension, if there was one.
    pub fn remove(&mut self, id: u8) -> Option<HeaderExtension> {
        let removed = self.extensions.remove(&id);
        if removed.is_some() {
            *self.size_bytes.get_mut() = SIZE_UNKNOWN;
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderExtension> {
        self.extensions.values()
    }

    /// The form every extension in this set will be written in
    pub fn form(&self) -> HeaderExtensionForm {
        self.extensions
            .values()
            .map(HeaderExtension::form)
            .max()
            .unwrap_or(HeaderExtensionForm::OneByte)
    }

    /// The size of the serialized block, including the generic header and padding.  An empty set
    /// has size 0, since nothing is written for it.
    pub fn size_bytes(&self) -> usize {
        let cached = self.size_bytes.load(Ordering::Relaxed);
        if cached != SIZE_UNKNOWN {
            return cached;
        }
        let size_bytes = self.calculate_size_bytes();
        self.size_bytes.store(size_bytes, Ordering::Relaxed);
        size_bytes
    }

    fn calculate_size_bytes(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let form = self.form();
        let data_size_bytes: usize = self
            .extensions
            .values()
            .map(|ext| ext.size_bytes_as(form))
            .sum();
        word_aligned(Self::HEADER_SIZE_BYTES + data_size_bytes)
    }

    /// Write the extension block (generic header, every extension and trailing padding) to `buf`.
    /// Nothing is written for an empty set.
    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let size_bytes = self.size_bytes();
        buf.ensure_space(size_bytes)
            .context("header extensions block")?;
        let form = self.form();
        buf.put_u16(form.cookie());
        // Length is in 32-bit words and doesn't count the generic header
        buf.put_u16((size_bytes / 4 - 1) as u16);
        let mut bytes_written = Self::HEADER_SIZE_BYTES;
        for ext in self.extensions.values() {
            ext.write_as(form, buf)?;
            bytes_written += ext.size_bytes_as(form);
        }
        buf.put_padding(size_bytes - bytes_written);
        trace!(
            "wrote {} header extensions as {form:?}, {size_bytes} bytes",
            self.len()
        );
        Ok(())
    }
}

impl<'a> IntoIterator for &'a HeaderExtensions {
    type Item = (&'a u8, &'a HeaderExtension);

    type IntoIter = std::collections::btree_map::Iter<'a, u8, HeaderExtension>;

    fn into_iter(self) -> Self::IntoIter {
        self.extensions.iter()
    }
}

impl FromIterator<HeaderExtension> for HeaderExtensions {
    fn from_iter<T: IntoIterator<Item = HeaderExtension>>(iter: T) -> Self {
        let mut extensions = HeaderExtensions::new();
        for ext in iter {
            extensions.add(ext);
        }
        extensions
    }
}

/// Read a header extensions block.  The given buffer should start at the beginning of the block
/// (the cookie), and is left just past the end of the block as described by its length field.
pub fn read_header_extensions<B: PacketBuffer>(buf: &mut B) -> Result<HeaderExtensions> {
    let cookie = buf.read_u16().context("header extensions cookie")?;
    let form = HeaderExtensionForm::from_cookie(cookie)
        .ok_or(RtpCodecError::UnsupportedExtensionCookie(cookie))?;
    let length_words = buf.read_u16().context("header extensions length")?;
    // 'length_words' describes the length in 4-byte words, not counting the generic header
    let length_bytes = length_words as usize * 4;
    if buf.remaining() < length_bytes {
        return Err(RtpCodecError::MalformedExtension {
            length_field_bytes: length_bytes,
            buf_remaining_bytes: buf.remaining(),
        })
        .context("header extensions block");
    }

    let extensions = {
        let mut ext_buf = buf.sub_buffer(length_bytes)?;
        read_extension_elements(form, &mut ext_buf, length_bytes)?
    };
    buf.advance(length_bytes);

    trace!(
        "read {} header extensions as {form:?}, {} bytes",
        extensions.len(),
        HeaderExtensions::HEADER_SIZE_BYTES + length_bytes
    );
    Ok(extensions)
}

fn read_extension_elements<B: PacketBuffer>(
    form: HeaderExtensionForm,
    buf: &mut B,
    length_bytes: usize,
) -> Result<HeaderExtensions> {
    let mut extensions = HeaderExtensions::new();
    // "[Padding] may be placed between extension elements, if desired for alignment, or after
    // the last extension element, if needed for padding."
    // -https://tools.ietf.org/html/rfc5285#section-4.1
    consume_padding(buf, length_bytes);
    let mut i = 0;
    while buf.has_remaining() {
        if form == HeaderExtensionForm::OneByte {
            match buf.peek_u8().map(|id_len| id_len >> 4) {
                Some(HeaderExtension::ONE_BYTE_RESERVED_ID) => {
                    // If the ID value 15 is encountered, its length field MUST be ignored,
                    // processing of the entire extension MUST terminate at that point
                    debug!("found reserved one-byte extension id 15, ignoring rest of block");
                    break;
                }
                Some(0) => {
                    // An id of 0 is padding, even if the length bits aren't 0
                    buf.advance(1);
                    consume_padding(buf, length_bytes);
                    continue;
                }
                _ => {}
            }
        }
        let ext = HeaderExtension::read_as(form, buf)
            .with_context(|| format!("header extension {i}"))?;
        extensions.add(ext);
        consume_padding(buf, length_bytes);
        i += 1;
    }
    Ok(extensions)
}
