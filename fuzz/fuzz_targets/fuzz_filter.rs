#![no_main]

use laptop_catalog::filter::qualifies;
use laptop_catalog::proto::{Filter, Laptop};
use libfuzzer_sys::fuzz_target;
use prost::Message;

fuzz_target!(|data: &[u8]| {
    let (left, right) = data.split_at(data.len() / 2);
    if let (Ok(filter), Ok(laptop)) = (Filter::decode(left), Laptop::decode(right)) {
        let _ = qualifies(&filter, &laptop);
    }
});
