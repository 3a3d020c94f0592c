use super::{read_lossy, Error};
use std::path::Path;

/// Split a file into at-most `chunk_size` byte chunks for indexing.
///
/// Splitting is line-aware: whole lines (terminator included) are packed
/// into a chunk until the next line would overflow it. A single line
/// longer than `chunk_size` is split hard at the byte limit, on a UTF-8
/// character boundary. Chunk numbers are 1-based and contiguous; an
/// empty file yields no chunks.
pub fn split_file_into_chunks(
    path: impl AsRef<Path>,
    chunk_size: usize,
) -> Result<Vec<(u32, String)>, Error> {
    let text = read_lossy(path.as_ref())?;

    let mut chunks = Vec::new();
    let mut current = String::new();

    let mut flush = |current: &mut String, chunks: &mut Vec<(u32, String)>| {
        if !current.is_empty() {
            let number = chunks.len() as u32 + 1;
            chunks.push((number, std::mem::take(current)));
        }
    };

    for line in lines_with_endings(&text) {
        for piece in split_oversized(line, chunk_size) {
            if current.len() + piece.len() > chunk_size {
                flush(&mut current, &mut chunks);
            }
            current.push_str(piece);
        }
    }
    flush(&mut current, &mut chunks);

    Ok(chunks)
}

/// Iterate lines of `text`, keeping the trailing newline with each line.
fn lines_with_endings(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let line = match rest.find('\n') {
            Some(index) => {
                let (line, tail) = rest.split_at(index + 1);
                rest = tail;
                line
            }
            None => std::mem::take(&mut rest),
        };
        Some(line)
    })
}

/// Break a single line into pieces of at-most `limit` bytes, each ending
/// on a character boundary.
fn split_oversized(line: &str, limit: usize) -> impl Iterator<Item = &str> {
    let mut rest = line;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let mut end = limit.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (piece, tail) = rest.split_at(end);
        rest = tail;
        Some(piece)
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        let file = write_temp(b"");
        assert!(split_file_into_chunks(file.path(), 100).unwrap().is_empty());
    }

    #[test]
    fn file_of_exactly_chunk_size_is_one_chunk() {
        let file = write_temp(&vec![b'x'; 100]);
        let chunks = split_file_into_chunks(file.path(), 100).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].0, 1);
        assert_eq!(chunks[0].1.len(), 100);
    }

    #[test]
    fn one_byte_over_spills_into_a_second_chunk() {
        let file = write_temp(&vec![b'x'; 101]);
        let chunks = split_file_into_chunks(file.path(), 100).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].1.len(), 100);
        assert_eq!(chunks[1].1.len(), 1);
        assert_eq!(chunks[1].0, 2);
    }

    #[test]
    fn lines_are_kept_whole_when_they_fit() {
        let file = write_temp(b"aaaa\nbbbb\ncccc\n");
        let chunks = split_file_into_chunks(file.path(), 10).unwrap();
        // Two 5-byte lines fit a 10-byte chunk; the third starts a new one.
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].1, "aaaa\nbbbb\n");
        assert_eq!(chunks[1].1, "cccc\n");
    }

    #[test]
    fn hard_split_lands_on_char_boundaries() {
        // Each 'é' is two bytes; an odd limit may not land on a boundary.
        let file = write_temp("ééééé".as_bytes());
        let chunks = split_file_into_chunks(file.path(), 5).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].1, "éé");
        assert_eq!(chunks[1].1, "éé");
        assert_eq!(chunks[2].1, "é");
    }

    #[test]
    fn chunk_numbers_are_one_based_and_contiguous() {
        let file = write_temp(&vec![b'y'; 350]);
        let chunks = split_file_into_chunks(file.path(), 100).unwrap();
        let numbers: Vec<u32> = chunks.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }
}
