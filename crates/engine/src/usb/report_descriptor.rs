//! HID report descriptor scanning
//!
//! Only the top-level usage page and usage are extracted; the engine treats
//! report contents as opaque bytes.

const LONG_ITEM_PREFIX: u8 = 0xFE;

const TYPE_MAIN: u8 = 0;
const TYPE_GLOBAL: u8 = 1;
const TYPE_LOCAL: u8 = 2;

const TAG_COLLECTION: u8 = 0x0A;
const TAG_USAGE_PAGE: u8 = 0x00;
const TAG_USAGE: u8 = 0x00;

/// Usage page and usage of the first top-level collection
///
/// Returns `(usage_page, usage)`, or `None` if the descriptor opens no
/// collection or is truncated before one. An extended (32-bit) usage carries
/// its own usage page in the upper half.
pub fn top_level_usage(descriptor: &[u8]) -> Option<(u16, u16)> {
    let mut usage_page = 0u16;
    let mut usage: Option<u32> = None;
    let mut pos = 0;

    while pos < descriptor.len() {
        let prefix = descriptor[pos];

        if prefix == LONG_ITEM_PREFIX {
            let size = *descriptor.get(pos + 1)? as usize;
            pos += 3 + size;
            continue;
        }

        let size = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        let item_type = (prefix >> 2) & 0x03;
        let tag = prefix >> 4;
        let data = descriptor.get(pos + 1..pos + 1 + size)?;
        let value = data
            .iter()
            .rev()
            .fold(0u32, |acc, &byte| (acc << 8) | byte as u32);

        match (item_type, tag) {
            (TYPE_GLOBAL, TAG_USAGE_PAGE) => usage_page = value as u16,
            (TYPE_LOCAL, TAG_USAGE) if usage.is_none() => {
                usage = Some(if size == 4 { value } else { value & 0xFFFF });
            }
            (TYPE_MAIN, TAG_COLLECTION) => {
                let usage = usage.unwrap_or(0);
                return Some(if usage > 0xFFFF {
                    ((usage >> 16) as u16, usage as u16)
                } else {
                    (usage_page, usage as u16)
                });
            }
            _ => {}
        }

        pos += 1 + size;
    }

    None
}
