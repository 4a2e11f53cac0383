//! Length-delimited record wire format: a little-endian `u32` byte count
//! followed by a `bincode`-encoded [`RequestResponse`]. One record per file;
//! the recorder picks the filename, the reader doesn't care what it is.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{CoreError, Result};
use crate::record::RequestResponse;

pub fn write_record<W: Write>(w: &mut W, record: &RequestResponse) -> Result<()> {
    let encoded = bincode::serialize(record)
        .map_err(|e| CoreError::Internal(format!("record serialization failed: {e}")))?;
    w.write_u32::<LittleEndian>(encoded.len() as u32)?;
    w.write_all(&encoded)?;
    Ok(())
}

pub fn read_record<R: Read>(r: &mut R) -> Result<RequestResponse> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    bincode::deserialize(&buf)
        .map_err(|e| CoreError::Parse(format!("invalid record wire format: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HeaderList, HttpRequest, HttpResponse};
    use crate::record::Scheme;

    fn sample() -> RequestResponse {
        RequestResponse {
            scheme: Scheme::Http,
            request: HttpRequest {
                method: "GET".into(),
                uri: "/a".into(),
                version: "HTTP/1.1".into(),
                headers: HeaderList::new(),
                body: Vec::new(),
                request_id: Some(3),
            },
            response: HttpResponse {
                version: "HTTP/1.1".into(),
                status: 200,
                reason: "OK".into(),
                headers: HeaderList::new(),
                body: b"hello".to_vec(),
            },
        }
    }

    #[test]
    fn round_trips_through_a_buffer() {
        let record = sample();
        let mut buf = Vec::new();
        write_record(&mut buf, &record).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_record(&mut cursor).unwrap();
        assert_eq!(read_back.request.uri, "/a");
        assert_eq!(read_back.response.body, b"hello");
    }

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.bin");
        let record = sample();

        let mut file = std::fs::File::create(&path).unwrap();
        write_record(&mut file, &record).unwrap();

        let mut file = std::fs::File::open(&path).unwrap();
        let read_back = read_record(&mut file).unwrap();
        assert_eq!(read_back.request.method, "GET");
    }
}
