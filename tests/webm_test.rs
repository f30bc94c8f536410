use shiguredo_mp4_to_webm::{
    ebml::ElementHeader,
    engine::{ColorSpace, EncodedChunk, EncodedChunkMetadata},
    webm::{WebmMuxError, WebmMuxer, WebmTrackConfig, ids},
};

/// バッファ内の要素を先頭から順に読み込む
fn elements(mut buf: &[u8]) -> Vec<(u32, &[u8])> {
    let mut items = Vec::new();
    while !buf.is_empty() {
        let (header, data) = ElementHeader::read_element(buf).expect("valid element");
        items.push((header.id, data));
        buf = &buf[header.header_size + data.len()..];
    }
    items
}

fn child(buf: &[u8], id: u32) -> &[u8] {
    elements(buf)
        .into_iter()
        .find(|(i, _)| *i == id)
        .map(|(_, data)| data)
        .unwrap_or_else(|| panic!("element 0x{id:X} not found"))
}

fn uint(data: &[u8]) -> u64 {
    data.iter().fold(0, |acc, b| (acc << 8) | u64::from(*b))
}

fn chunk(timestamp_ms: i64, keyframe: bool) -> EncodedChunk {
    EncodedChunk {
        data: vec![0x9D, 0x01, 0x2A, timestamp_ms as u8],
        keyframe,
        timestamp: timestamp_ms * 1000,
        duration: Some(33_000),
        metadata: None,
    }
}

fn mux(chunks: &[EncodedChunk]) -> Vec<u8> {
    let mut muxer = WebmMuxer::new(WebmTrackConfig::vp8(320, 240, Some(30.0)), "webm-test");
    for c in chunks {
        muxer.add_chunk(c).expect("add chunk");
    }
    assert_eq!(muxer.chunk_count(), chunks.len());
    muxer.finalize().expect("finalize")
}

/// (EBML ヘッダー, Segment のデータ部分) を返す
fn split_file(bytes: &[u8]) -> (&[u8], &[u8]) {
    let top = elements(bytes);
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].0, ids::EBML);
    assert_eq!(top[1].0, ids::SEGMENT);
    (top[0].1, top[1].1)
}

#[test]
fn file_layout_follows_webm_structure() {
    let bytes = mux(&[chunk(0, true), chunk(33, false), chunk(66, false)]);
    let (header, segment) = split_file(&bytes);

    assert_eq!(child(header, ids::DOC_TYPE), b"webm");
    assert_eq!(uint(child(header, ids::EBML_MAX_ID_LENGTH)), 4);

    let order: Vec<u32> = elements(segment).iter().map(|(id, _)| *id).collect();
    assert_eq!(
        order,
        [ids::SEEK_HEAD, ids::INFO, ids::TRACKS, ids::CLUSTER, ids::CUES]
    );

    let info = child(segment, ids::INFO);
    assert_eq!(uint(child(info, ids::TIMESTAMP_SCALE)), 1_000_000);
    assert_eq!(child(info, ids::WRITING_APP), b"webm-test");
    let duration = f64::from_be_bytes(child(info, ids::DURATION).try_into().expect("8 bytes"));
    assert_eq!(duration, 99.0);

    let entry = child(child(segment, ids::TRACKS), ids::TRACK_ENTRY);
    assert_eq!(uint(child(entry, ids::TRACK_NUMBER)), 1);
    assert_eq!(uint(child(entry, ids::TRACK_TYPE)), 1);
    assert_eq!(child(entry, ids::CODEC_ID), b"V_VP8");
    assert_eq!(uint(child(entry, ids::DEFAULT_DURATION)), 33_333_333);
    let video = child(entry, ids::VIDEO);
    assert_eq!(uint(child(video, ids::PIXEL_WIDTH)), 320);
    assert_eq!(uint(child(video, ids::PIXEL_HEIGHT)), 240);
}

#[test]
fn keyframes_start_clusters_with_cue_points() {
    let bytes = mux(&[
        chunk(0, true),
        chunk(33, false),
        chunk(66, false),
        chunk(100, true),
        chunk(133, false),
    ]);
    let (_, segment) = split_file(&bytes);

    // 各要素の Segment データ先頭からのオフセット
    let mut positions = Vec::new();
    let mut offset = 0;
    for (id, data) in elements(segment) {
        let header = ElementHeader::read(&segment[offset..]).expect("header");
        positions.push((id, offset as u64, data));
        offset += header.header_size + data.len();
    }

    let clusters: Vec<_> = positions
        .iter()
        .filter(|(id, _, _)| *id == ids::CLUSTER)
        .collect();
    assert_eq!(clusters.len(), 2);
    assert_eq!(uint(child(clusters[0].2, ids::TIMESTAMP)), 0);
    assert_eq!(uint(child(clusters[1].2, ids::TIMESTAMP)), 100);

    let blocks: Vec<_> = elements(clusters[0].2)
        .into_iter()
        .filter(|(id, _)| *id == ids::SIMPLE_BLOCK)
        .map(|(_, data)| data)
        .collect();
    assert_eq!(blocks.len(), 3);
    // トラック番号 (vint), 相対時刻 (i16), フラグ, フレームデータ
    assert_eq!(blocks[0], [0x81, 0x00, 0x00, 0x80, 0x9D, 0x01, 0x2A, 0]);
    assert_eq!(&blocks[1][..4], [0x81, 0x00, 33, 0x00]);
    assert_eq!(&blocks[2][..4], [0x81, 0x00, 66, 0x00]);

    let cue_points: Vec<_> = elements(child(segment, ids::CUES))
        .into_iter()
        .map(|(_, point)| {
            let time = uint(child(point, ids::CUE_TIME));
            let positions = child(point, ids::CUE_TRACK_POSITIONS);
            assert_eq!(uint(child(positions, ids::CUE_TRACK)), 1);
            (time, uint(child(positions, ids::CUE_CLUSTER_POSITION)))
        })
        .collect();
    assert_eq!(cue_points, [(0, clusters[0].1), (100, clusters[1].1)]);
}

#[test]
fn seek_head_points_at_top_level_elements() {
    let bytes = mux(&[chunk(0, true), chunk(33, false)]);
    let (_, segment) = split_file(&bytes);

    let seek_head = child(segment, ids::SEEK_HEAD);
    let seeks = elements(seek_head);
    assert_eq!(seeks.len(), 3);
    for (_, seek) in seeks {
        let id = uint(child(seek, ids::SEEK_ID)) as u32;
        let position = uint(child(seek, ids::SEEK_POSITION)) as usize;
        let header = ElementHeader::read(&segment[position..]).expect("header");
        assert_eq!(header.id, id);
    }
}

#[test]
fn file_without_keyframes_has_no_cues() {
    let bytes = mux(&[chunk(0, false), chunk(33, false)]);
    let (_, segment) = split_file(&bytes);

    let order: Vec<u32> = elements(segment).iter().map(|(id, _)| *id).collect();
    assert_eq!(order, [ids::SEEK_HEAD, ids::INFO, ids::TRACKS, ids::CLUSTER]);
    assert_eq!(elements(child(segment, ids::SEEK_HEAD)).len(), 2);
}

#[test]
fn long_gap_without_keyframe_starts_new_cluster() {
    let bytes = mux(&[chunk(0, true), chunk(40_000, false)]);
    let (_, segment) = split_file(&bytes);

    let clusters: Vec<_> = elements(segment)
        .into_iter()
        .filter(|(id, _)| *id == ids::CLUSTER)
        .map(|(_, data)| uint(child(data, ids::TIMESTAMP)))
        .collect();
    assert_eq!(clusters, [0, 40_000]);
    assert_eq!(elements(child(segment, ids::CUES)).len(), 1);
}

#[test]
fn colour_is_taken_from_chunk_metadata() {
    let mut first = chunk(0, true);
    first.metadata = Some(EncodedChunkMetadata {
        color_space: Some(ColorSpace {
            primaries: Some(1),
            transfer: Some(1),
            matrix: Some(1),
            full_range: Some(false),
        }),
    });
    let bytes = mux(&[first, chunk(33, false)]);
    let (_, segment) = split_file(&bytes);

    let entry = child(child(segment, ids::TRACKS), ids::TRACK_ENTRY);
    let colour = child(child(entry, ids::VIDEO), ids::COLOUR);
    assert_eq!(uint(child(colour, ids::MATRIX_COEFFICIENTS)), 1);
    assert_eq!(uint(child(colour, ids::RANGE)), 1);
    assert_eq!(uint(child(colour, ids::PRIMARIES)), 1);
}

#[test]
fn invalid_chunk_sequences_are_rejected() {
    let muxer = WebmMuxer::new(WebmTrackConfig::vp8(320, 240, None), "webm-test");
    assert_eq!(muxer.finalize(), Err(WebmMuxError::NoChunks));

    let mut muxer = WebmMuxer::new(WebmTrackConfig::vp8(320, 240, None), "webm-test");
    muxer.add_chunk(&chunk(100, true)).expect("add chunk");
    assert_eq!(
        muxer.add_chunk(&chunk(50, false)),
        Err(WebmMuxError::DecreasingTimestamp {
            previous: 100_000,
            timestamp: 50_000
        })
    );

    // 同じ時刻のチャンクは受け付ける
    muxer.add_chunk(&chunk(100, false)).expect("same timestamp");
    assert_eq!(muxer.chunk_count(), 2);
}

#[test]
fn negative_first_timestamp_shifts_the_timeline() {
    let bytes = mux(&[chunk(-33, true), chunk(0, false), chunk(33, false)]);
    let (_, segment) = split_file(&bytes);

    let cluster = child(segment, ids::CLUSTER);
    assert_eq!(uint(child(cluster, ids::TIMESTAMP)), 0);
    let relative: Vec<_> = elements(cluster)
        .into_iter()
        .filter(|(id, _)| *id == ids::SIMPLE_BLOCK)
        .map(|(_, data)| i16::from_be_bytes([data[1], data[2]]))
        .collect();
    assert_eq!(relative, [0, 33, 66]);

    let info = child(segment, ids::INFO);
    let duration = f64::from_be_bytes(child(info, ids::DURATION).try_into().expect("8 bytes"));
    assert_eq!(duration, 99.0);

    let cue_point = child(child(segment, ids::CUES), ids::CUE_POINT);
    assert_eq!(uint(child(cue_point, ids::CUE_TIME)), 0);
}
