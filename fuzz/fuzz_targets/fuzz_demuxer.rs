#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_mp4_to_webm::demux::Mp4VideoDemuxer;

fuzz_target!(|data: &[u8]| {
    let Ok(demuxer) = Mp4VideoDemuxer::new(data) else {
        return;
    };
    let Ok(extractor) = demuxer.extract_samples(16) else {
        return;
    };
    let mut extracted = 0;
    for batch in extractor {
        let Ok(batch) = batch else {
            break;
        };
        extracted += batch.len();
    }
    assert!(extracted <= demuxer.track().sample_count);
});
