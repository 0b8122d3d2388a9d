#![no_main]

use laptop_catalog::proto::UploadImageRequest;
use libfuzzer_sys::fuzz_target;
use prost::Message;

fuzz_target!(|data: &[u8]| {
    let _ = UploadImageRequest::decode(data);
});
