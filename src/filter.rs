use crate::proto::memory::Unit;
use crate::proto::{Filter, Laptop, Memory};

/// Returns true when `laptop` satisfies every bound in `filter`.
///
/// Bounds are inclusive: a laptop priced exactly at `max_price_usd` qualifies, as does
/// one with exactly `min_cpu_cores`, `min_cpu_ghz`, or `min_ram`.
pub fn qualifies(filter: &Filter, laptop: &Laptop) -> bool {
    if laptop.price_usd > filter.max_price_usd {
        return false;
    }

    let (cores, min_ghz) = laptop
        .cpu
        .as_ref()
        .map_or((0, 0.0), |cpu| (cpu.number_cores, cpu.min_ghz));
    if cores < filter.min_cpu_cores {
        return false;
    }

    if min_ghz < filter.min_cpu_ghz {
        return false;
    }

    memory_bits(laptop.ram.as_ref()) >= memory_bits(filter.min_ram.as_ref())
}

/// Normalises a memory amount to bits.
///
/// A missing amount or an unknown unit is zero bits.
pub fn memory_bits(memory: Option<&Memory>) -> u64 {
    let Some(memory) = memory else {
        return 0;
    };

    let shift = match memory.unit() {
        Unit::Bit => 0,
        Unit::Byte => 3,
        Unit::Kilobyte => 13,
        Unit::Megabyte => 23,
        Unit::Gigabyte => 33,
        Unit::Terabyte => 43,
        Unit::Unknown => return 0,
    };

    if memory.value > (u64::MAX >> shift) {
        u64::MAX
    } else {
        memory.value << shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Cpu;

    fn memory(value: u64, unit: Unit) -> Memory {
        Memory {
            value,
            unit: unit as i32,
        }
    }

    fn laptop(price: f64, cores: u32, ghz: f64, ram: Memory) -> Laptop {
        Laptop {
            id: "a".to_string(),
            brand: "Lenovo".to_string(),
            name: "Thinkpad X1".to_string(),
            cpu: Some(Cpu {
                brand: "Intel".to_string(),
                name: "Core i7".to_string(),
                number_cores: cores,
                number_threads: cores * 2,
                min_ghz: ghz,
                max_ghz: ghz + 1.0,
            }),
            ram: Some(ram),
            price_usd: price,
            release_year: 2020,
        }
    }

    fn search_filter() -> Filter {
        Filter {
            max_price_usd: 3000.0,
            min_cpu_cores: 4,
            min_cpu_ghz: 2.5,
            min_ram: Some(memory(8, Unit::Gigabyte)),
        }
    }

    #[test]
    fn boundary_values_qualify() {
        let laptop = laptop(3000.0, 4, 2.5, memory(8, Unit::Gigabyte));
        assert!(qualifies(&search_filter(), &laptop));
    }

    #[test]
    fn each_bound_rejects_independently() {
        let filter = search_filter();

        assert!(!qualifies(
            &filter,
            &laptop(3000.01, 8, 3.0, memory(16, Unit::Gigabyte))
        ));
        assert!(!qualifies(
            &filter,
            &laptop(2000.0, 2, 3.0, memory(16, Unit::Gigabyte))
        ));
        assert!(!qualifies(
            &filter,
            &laptop(2000.0, 8, 2.4, memory(16, Unit::Gigabyte))
        ));
        assert!(!qualifies(
            &filter,
            &laptop(2000.0, 8, 3.0, memory(4096, Unit::Megabyte))
        ));
    }

    #[test]
    fn gigabyte_equals_1024_megabytes() {
        assert_eq!(
            memory_bits(Some(&memory(1, Unit::Gigabyte))),
            memory_bits(Some(&memory(1024, Unit::Megabyte)))
        );
        assert_eq!(memory_bits(Some(&memory(1, Unit::Byte))), 8);
        assert_eq!(
            memory_bits(Some(&memory(1, Unit::Terabyte))),
            memory_bits(Some(&memory(1024, Unit::Gigabyte)))
        );
    }

    #[test]
    fn unknown_unit_is_zero_bits() {
        assert_eq!(memory_bits(Some(&memory(64, Unit::Unknown))), 0);
        let undecodable = Memory {
            value: 64,
            unit: 42,
        };
        assert_eq!(memory_bits(Some(&undecodable)), 0);
        assert_eq!(memory_bits(None), 0);

        let laptop = laptop(1000.0, 8, 3.0, memory(64, Unit::Unknown));
        assert!(!qualifies(&search_filter(), &laptop));
    }

    #[test]
    fn oversized_amounts_saturate() {
        assert_eq!(memory_bits(Some(&memory(u64::MAX, Unit::Terabyte))), u64::MAX);
    }
}
