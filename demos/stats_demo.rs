use std::hash::BuildHasher;

use clap::Parser;
use flat_hash::HashTable;
use flat_hash::hash_table::Entry;
use siphasher::sip::SipHasher;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    /// Percentage of the elements to erase and reinsert under new keys after
    /// the initial fill.
    #[arg(short = 'e', long = "erase_percent", default_value_t = 25)]
    erase_percent: usize,
}

#[derive(Default)]
struct SipBuilder;

impl BuildHasher for SipBuilder {
    type Hasher = SipHasher;

    fn build_hasher(&self) -> SipHasher {
        SipHasher::new()
    }
}

fn main() {
    let args = Args::parse();
    let builder = SipBuilder;
    let hash_u64 = |value: &u64| builder.hash_one(value);

    println!(
        "Creating HashTable with target capacity: {}",
        args.target_capacity
    );

    let mut table: HashTable<u64> = HashTable::with_capacity(args.target_capacity);
    let bucket_count = table.bucket_count();

    println!(
        "Actual capacity: {} ({} groups)",
        table.capacity(),
        bucket_count
    );
    println!("Filling table with u64 values...");

    let num_values = table.capacity() as u64;
    for value in 0..num_values {
        match table.entry(hash_u64(&value), |&v| v == value, hash_u64) {
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
            Entry::Occupied(_) => {
                panic!("Value already exists in table: {}", value);
            }
        }
    }

    println!("Inserted {} values into table", table.len());
    table.probe_histogram(hash_u64).print();
    table.debug_stats().print();

    let churn = num_values * args.erase_percent.min(100) as u64 / 100;
    println!("Erasing and reinserting {churn} values...");
    for value in 0..churn {
        table.remove(hash_u64(&value), |&v| v == value);
        let replacement = num_values + value;
        table.insert_unique(hash_u64(&replacement), replacement, hash_u64);
    }

    println!(
        "After churn: {} values, {} groups (was {})",
        table.len(),
        table.bucket_count(),
        bucket_count
    );
    table.probe_histogram(hash_u64).print();
    table.debug_stats().print();
}
