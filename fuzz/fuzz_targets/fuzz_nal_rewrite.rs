#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_mp4_to_webm::bitstream::{
    NalUnitSyntax, ParameterSets, annexb_nal_units, length_prefixed_to_annexb, to_rbsp,
};

fuzz_target!(|data: &[u8]| {
    let Some((&selector, data)) = data.split_first() else {
        return;
    };
    let length_size = usize::from(selector % 4) + 1;

    if let Ok(annexb) = length_prefixed_to_annexb(data, length_size) {
        let _ = annexb_nal_units(&annexb);
    }

    let syntax = if selector & 0x80 == 0 {
        NalUnitSyntax::Avc
    } else {
        NalUnitSyntax::Hevc
    };
    let mut sets = ParameterSets::default();
    if sets.scan(data, length_size, syntax).is_ok()
        && let Some(sps) = &sets.sps
    {
        assert!(to_rbsp(sps).len() <= sps.len());
    }
});
