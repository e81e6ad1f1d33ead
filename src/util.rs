//! Small OS helpers shared across the runtime: page size, plugin stack
//! sizing, and the hex dump used by the state-file dump tool.

use std::io::{self, Write};

use nix::unistd::{sysconf, SysconfVar};

/// Default stack size for plugin worker threads when the configuration does
/// not specify one.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Returns the system page size, falling back to 4 KiB if the sysconf
/// lookup is unavailable.
pub fn page_size() -> usize {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(sz)) if sz > 0 => sz as usize,
        _ => 4096,
    }
}

/// Clamps a requested thread stack size to something the platform accepts:
/// never below `PTHREAD_STACK_MIN`, rounded up to a whole page.
pub fn clamp_stack_size(requested: usize) -> usize {
    let min = libc::PTHREAD_STACK_MIN;
    let page = page_size();
    let size = requested.max(min);
    match size % page {
        0 => size,
        rem => size + (page - rem),
    }
}

/// Writes `data` as a classic hex dump: offset column, sixteen hex bytes,
/// and an ASCII gutter.
pub fn hex_dump<W: Write>(w: &mut W, data: &[u8]) -> io::Result<()> {
    for (line, chunk) in data.chunks(16).enumerate() {
        write!(w, "{:08x}  ", line * 16)?;
        for col in 0..16 {
            match chunk.get(col) {
                Some(byte) => write!(w, "{byte:02x} ")?,
                None => write!(w, "   ")?,
            }
            if col == 7 {
                write!(w, " ")?;
            }
        }
        write!(w, " |")?;
        for byte in chunk {
            let ch = if byte.is_ascii_graphic() || *byte == b' ' {
                *byte as char
            } else {
                '.'
            };
            write!(w, "{ch}")?;
        }
        writeln!(w, "|")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_size_is_page_rounded() {
        let page = page_size();
        let clamped = clamp_stack_size(page + 1);
        assert_eq!(clamped % page, 0);
        assert!(clamped >= page + 1);
    }

    #[test]
    fn stack_size_never_below_platform_minimum() {
        assert!(clamp_stack_size(1) >= libc::PTHREAD_STACK_MIN);
    }

    #[test]
    fn hex_dump_shape() {
        let mut out = Vec::new();
        hex_dump(&mut out, b"hello, world: \x00\x01\x02").unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        let first = lines.next().unwrap();
        assert!(first.starts_with("00000000  68 65 6c 6c 6f "));
        assert!(first.contains("|hello, world: .."));
        let second = lines.next().unwrap();
        assert!(second.starts_with("00000010  02 "));
    }
}
