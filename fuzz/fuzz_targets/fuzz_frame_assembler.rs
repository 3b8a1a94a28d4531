#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use genlink::{crc, try_extract_frame, Extraction};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    address: u8,
    chunks: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let mut buf = BytesMut::new();

    for chunk in &input.chunks {
        buf.extend_from_slice(chunk);

        loop {
            let before = buf.len();
            match try_extract_frame(&mut buf, input.address) {
                Extraction::NeedMoreData => {
                    assert_eq!(buf.len(), before);
                    break;
                }
                Extraction::Frame(frame) => {
                    assert_eq!(frame.address(), input.address);
                    assert!(crc::verify(frame.as_bytes()));
                    assert_eq!(buf.len(), before - frame.len());
                }
                Extraction::CrcError { frame, .. } => {
                    assert!(!crc::verify(frame.as_bytes()));
                    assert_eq!(buf.len(), before - frame.len());
                }
                Extraction::FramingError { .. } => {
                    assert_eq!(buf.len(), before - 1);
                }
            }
        }
    }
});
