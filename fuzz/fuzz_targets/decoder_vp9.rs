#![no_main]

use cros_vp9dec::bitstream_utils::IvfIterator;
use cros_vp9dec::decoders::vp9::decoder::Decoder;
use cros_vp9dec::decoders::vp9::decoder::DecoderConfig;
use cros_vp9dec::utils::simple_playback_loop;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(ivf) = IvfIterator::new(data) else {
        return;
    };

    let mut decoder = Decoder::new(DecoderConfig {
        threads: 2,
        ..Default::default()
    });

    let _ = simple_playback_loop(&mut decoder, ivf, &mut |_| (), false);
});
