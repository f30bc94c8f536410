#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_mp4_to_webm::ebml::ElementHeader;

fuzz_target!(|data: &[u8]| {
    let mut buf = data;
    while let Ok((header, payload)) = ElementHeader::read_element(buf) {
        let consumed = header.header_size + payload.len();
        if consumed == 0 || consumed > buf.len() {
            panic!("invalid element size: {consumed}");
        }
        buf = &buf[consumed..];
    }
});
