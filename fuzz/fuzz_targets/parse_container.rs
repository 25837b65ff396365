#![no_main]

use dbgi_core::{parse, unpack, DecompressError, SectionEncoding};
use libfuzzer_sys::fuzz_target;

// Packed sections hold a single byte repeated over the whole unpacked size.
fn fill(src: &[u8], dst: &mut [u8]) -> Result<(), DecompressError> {
    match src {
        [b] => {
            dst.fill(*b);
            Ok(())
        }
        _ => Err(DecompressError("bad run".into())),
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(layout) = parse(data) else {
        return;
    };
    for section in &layout.sections {
        let start = section.off as usize;
        let _ = &data[start..start + section.encoded_size as usize];
    }

    // The unpacked size comes from the input, keep memory bounded.
    match layout.unpacked_size() {
        Some(size) if size <= 1 << 24 => {}
        _ => return,
    }
    if let Ok(image) = unpack(data, &layout, &fill) {
        let unpacked = parse(&image).expect("unpacked image must parse");
        assert_eq!(unpacked.sections.len(), layout.sections.len());
        assert!(unpacked
            .sections
            .iter()
            .all(|s| s.encoding == SectionEncoding::Unpacked && s.off % 8 == 0));
    }
});
