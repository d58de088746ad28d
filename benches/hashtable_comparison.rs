use core::hash::Hash;
use core::hash::Hasher;
use core::hint::black_box;

use criterion::AxisScale;
use criterion::BatchSize;
use criterion::BenchmarkGroup;
use criterion::Criterion;
use criterion::PlotConfiguration;
use criterion::Throughput;
use criterion::criterion_group;
use criterion::criterion_main;
use criterion::measurement::WallTime;
use flat_hash::HashTable as FlatHashTable;
use rand::Rng;
use rand::SeedableRng;
use rand::TryRngCore;
use rand::rngs::OsRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand_distr::Zipf;
use siphasher::sip::SipHasher;

trait KeyValuePair: Clone {
    fn new(key: u64) -> Self;

    fn hash_key(&self) -> u64;
    fn eq_key(&self, other: &Self) -> bool;
}

fn sip_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = SipHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[derive(Clone)]
struct SmallItem {
    key: u64,
}

impl KeyValuePair for SmallItem {
    fn new(key: u64) -> Self {
        black_box(Self { key })
    }

    fn hash_key(&self) -> u64 {
        sip_hash(&self.key)
    }

    fn eq_key(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

#[derive(Clone)]
struct StringItem {
    key: String,
    _value: u64,
}

impl KeyValuePair for StringItem {
    fn new(key: u64) -> Self {
        black_box(Self {
            key: format!("key_{key:016X}"),
            _value: key,
        })
    }

    fn hash_key(&self) -> u64 {
        sip_hash(self.key.as_str())
    }

    fn eq_key(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

#[derive(Clone)]
struct LargeItem {
    key: u64,
    _payload: [u8; 256],
}

impl KeyValuePair for LargeItem {
    fn new(key: u64) -> Self {
        black_box(Self {
            key,
            _payload: [key as u8; 256],
        })
    }

    fn hash_key(&self) -> u64 {
        sip_hash(&self.key)
    }

    fn eq_key(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

/// The operations every benchmark drives, implemented for both tables.
trait BenchTable<T: KeyValuePair> {
    const NAME: &'static str;

    fn with_capacity(capacity: usize) -> Self;
    fn capacity(&self) -> usize;
    fn len(&self) -> usize;

    /// Inserts `item` if absent. Returns `false` if it was already present.
    fn insert(&mut self, hash: u64, item: T) -> bool;
    /// Inserts `item` if absent, removes the existing element otherwise.
    fn toggle(&mut self, hash: u64, item: T);
    fn find(&self, hash: u64, item: &T) -> Option<&T>;
    fn remove(&mut self, hash: u64, item: &T) -> Option<T>;
    fn sum_keys(&self) -> usize;
    fn drain_count(&mut self) -> usize;
}

impl<T: KeyValuePair> BenchTable<T> for FlatHashTable<T> {
    const NAME: &'static str = "flat_hash";

    fn with_capacity(capacity: usize) -> Self {
        FlatHashTable::with_capacity(capacity)
    }

    fn capacity(&self) -> usize {
        FlatHashTable::capacity(self)
    }

    fn len(&self) -> usize {
        FlatHashTable::len(self)
    }

    fn insert(&mut self, hash: u64, item: T) -> bool {
        match self.entry(hash, |v| v.eq_key(&item), |v| v.hash_key()) {
            flat_hash::hash_table::Entry::Vacant(entry) => {
                black_box(entry.insert(item));
                true
            }
            flat_hash::hash_table::Entry::Occupied(_) => false,
        }
    }

    fn toggle(&mut self, hash: u64, item: T) {
        match self.entry(hash, |v| v.eq_key(&item), |v| v.hash_key()) {
            flat_hash::hash_table::Entry::Vacant(entry) => {
                black_box(entry.insert(item));
            }
            flat_hash::hash_table::Entry::Occupied(entry) => {
                black_box(entry.remove());
            }
        }
    }

    fn find(&self, hash: u64, item: &T) -> Option<&T> {
        FlatHashTable::find(self, hash, |v| v.eq_key(item))
    }

    fn remove(&mut self, hash: u64, item: &T) -> Option<T> {
        FlatHashTable::remove(self, hash, |v| v.eq_key(item))
    }

    fn sum_keys(&self) -> usize {
        self.iter().map(|v| v.hash_key() as usize & 1).sum()
    }

    fn drain_count(&mut self) -> usize {
        self.drain().map(black_box).count()
    }
}

impl<T: KeyValuePair> BenchTable<T> for hashbrown::HashTable<T> {
    const NAME: &'static str = "hashbrown";

    fn with_capacity(capacity: usize) -> Self {
        hashbrown::HashTable::with_capacity(capacity)
    }

    fn capacity(&self) -> usize {
        hashbrown::HashTable::capacity(self)
    }

    fn len(&self) -> usize {
        hashbrown::HashTable::len(self)
    }

    fn insert(&mut self, hash: u64, item: T) -> bool {
        match self.entry(hash, |v| v.eq_key(&item), |v| v.hash_key()) {
            hashbrown::hash_table::Entry::Vacant(entry) => {
                black_box(entry.insert(item));
                true
            }
            hashbrown::hash_table::Entry::Occupied(_) => false,
        }
    }

    fn toggle(&mut self, hash: u64, item: T) {
        match self.entry(hash, |v| v.eq_key(&item), |v| v.hash_key()) {
            hashbrown::hash_table::Entry::Vacant(entry) => {
                black_box(entry.insert(item));
            }
            hashbrown::hash_table::Entry::Occupied(entry) => {
                black_box(entry.remove().0);
            }
        }
    }

    fn find(&self, hash: u64, item: &T) -> Option<&T> {
        hashbrown::HashTable::find(self, hash, |v| v.eq_key(item))
    }

    fn remove(&mut self, hash: u64, item: &T) -> Option<T> {
        match hashbrown::HashTable::find_entry(self, hash, |v| v.eq_key(item)) {
            Ok(entry) => Some(entry.remove().0),
            Err(_) => None,
        }
    }

    fn sum_keys(&self) -> usize {
        self.iter().map(|v| v.hash_key() as usize & 1).sum()
    }

    fn drain_count(&mut self) -> usize {
        self.drain().map(black_box).count()
    }
}

const SIZES: &[usize] = &[
    (1 << 10),
    (1 << 12),
    (1 << 14),
    (1 << 16),
    (1 << 18),
];

fn random_items<T: KeyValuePair>(count: usize) -> Vec<(u64, T)> {
    let mut rng = OsRng;
    (0..count)
        .map(|_| {
            let item = T::new(rng.try_next_u64().unwrap());
            (item.hash_key(), item)
        })
        .collect()
}

fn shuffled<E: Clone>(items: &[E]) -> Vec<E> {
    let mut items = items.to_vec();
    items.shuffle(&mut SmallRng::from_os_rng());
    items
}

fn filled<T: KeyValuePair, Table: BenchTable<T>>(items: &[(u64, T)]) -> Table {
    let mut table = Table::with_capacity(items.len());
    for (hash, item) in items.iter().cloned() {
        table.insert(hash, item);
    }
    table
}

fn group_for<'a>(c: &'a mut Criterion, name: &str) -> BenchmarkGroup<'a, WallTime> {
    let mut group = c.benchmark_group(name);
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));
    group
}

fn insert_random<T: KeyValuePair, Table: BenchTable<T>>(
    group: &mut BenchmarkGroup<'_, WallTime>,
    size: usize,
    preallocate: bool,
) {
    let capacity = Table::with_capacity(size).capacity();
    let items = random_items::<T>(capacity);

    group.throughput(Throughput::Elements(capacity as u64));
    group.bench_function(format!("{}/{size}", Table::NAME), |b| {
        b.iter_batched(
            || shuffled(&items),
            |items| {
                let mut table = Table::with_capacity(if preallocate { size } else { 0 });
                for (hash, item) in items {
                    black_box(table.insert(hash, item));
                }
                black_box(table)
            },
            BatchSize::SmallInput,
        )
    });
}

fn find_hit_miss<T: KeyValuePair, Table: BenchTable<T>>(
    group: &mut BenchmarkGroup<'_, WallTime>,
    size: usize,
) {
    let capacity = Table::with_capacity(size).capacity();
    let present = random_items::<T>(capacity);
    let absent = random_items::<T>(capacity);
    let table: Table = filled(&present);
    let mut probes = present;
    probes.extend(absent);
    let probes = shuffled(&probes);

    group.throughput(Throughput::Elements(probes.len() as u64));
    group.bench_function(format!("{}/{size}", Table::NAME), |b| {
        b.iter(|| {
            for (hash, item) in &probes {
                black_box(table.find(*hash, item));
            }
        })
    });
}

fn remove_all<T: KeyValuePair, Table: BenchTable<T>>(
    group: &mut BenchmarkGroup<'_, WallTime>,
    size: usize,
) {
    let capacity = Table::with_capacity(size).capacity();
    let items = random_items::<T>(capacity);

    group.throughput(Throughput::Elements(capacity as u64));
    group.bench_function(format!("{}/{size}", Table::NAME), |b| {
        b.iter_batched(
            || (filled::<T, Table>(&items), shuffled(&items)),
            |(mut table, order)| {
                for (hash, item) in &order {
                    black_box(table.remove(*hash, item));
                }
                black_box(table.len())
            },
            BatchSize::SmallInput,
        )
    });
}

fn iterate_and_drain<T: KeyValuePair, Table: BenchTable<T>>(
    group: &mut BenchmarkGroup<'_, WallTime>,
    size: usize,
) {
    let capacity = Table::with_capacity(size).capacity();
    let items = random_items::<T>(capacity);
    let table: Table = filled(&items);

    group.throughput(Throughput::Elements(capacity as u64));
    group.bench_function(format!("{}/iter/{size}", Table::NAME), |b| {
        b.iter(|| black_box(table.sum_keys()))
    });
    group.bench_function(format!("{}/drain/{size}", Table::NAME), |b| {
        b.iter_batched(
            || filled::<T, Table>(&items),
            |mut table| black_box(table.drain_count()),
            BatchSize::SmallInput,
        )
    });
}

/// Inserts and erases the same keys over and over, so the table keeps
/// running its in-place overflow rebuild instead of growing.
fn churn<T: KeyValuePair, Table: BenchTable<T>>(
    group: &mut BenchmarkGroup<'_, WallTime>,
    size: usize,
) {
    let capacity = Table::with_capacity(size).capacity();
    let items = random_items::<T>(capacity / 2);
    let mut toggles = items.clone();
    toggles.extend(items.iter().cloned());
    toggles.extend(items);

    group.throughput(Throughput::Elements(toggles.len() as u64));
    group.bench_function(format!("{}/{size}", Table::NAME), |b| {
        b.iter_batched(
            || shuffled(&toggles),
            |toggles| {
                let mut table = Table::with_capacity(size);
                for (hash, item) in toggles {
                    table.toggle(hash, item);
                }
                black_box(table)
            },
            BatchSize::SmallInput,
        )
    });
}

#[derive(Clone, Copy)]
enum Operation {
    Find,
    Insert,
    Remove,
}

fn mixed_zipf<T: KeyValuePair, Table: BenchTable<T>>(
    group: &mut BenchmarkGroup<'_, WallTime>,
    size: usize,
    exponent: f64,
) {
    const KEY_SPACE_MULTIPLIER: f32 = 2.0;

    let capacity = Table::with_capacity(size).capacity();
    let mut rng = SmallRng::from_os_rng();

    let op_distr = Zipf::new(3.0, exponent).unwrap();
    let operations = (0..capacity * 3)
        .map(|_| {
            let op_choice: f64 = rng.sample(op_distr);
            if op_choice <= 1.0 {
                Operation::Find
            } else if op_choice <= 2.0 {
                Operation::Insert
            } else {
                Operation::Remove
            }
        })
        .collect::<Vec<_>>();

    let insert_distr = Zipf::new(capacity as f32 - 1.0, 1.0).unwrap();
    let lookup_distr = Zipf::new(capacity as f32 * KEY_SPACE_MULTIPLIER - 1.0, 1.0).unwrap();
    let keyed = |distr: Zipf<f32>, rng: &mut SmallRng| {
        let item = T::new(rng.sample(distr) as u64);
        (item.hash_key(), item)
    };
    let script = operations
        .into_iter()
        .map(|op| match op {
            Operation::Insert => (op, keyed(insert_distr, &mut rng)),
            Operation::Find | Operation::Remove => (op, keyed(lookup_distr, &mut rng)),
        })
        .collect::<Vec<_>>();

    group.throughput(Throughput::Elements(script.len() as u64));
    group.bench_function(format!("{}/{size}", Table::NAME), |b| {
        b.iter_batched(
            || script.clone(),
            |script| {
                let mut table = Table::with_capacity(0);
                for (op, (hash, item)) in script {
                    match op {
                        Operation::Insert => {
                            black_box(table.insert(hash, item));
                        }
                        Operation::Find => {
                            black_box(table.find(hash, &item));
                        }
                        Operation::Remove => {
                            black_box(table.remove(hash, &item));
                        }
                    }
                }
                black_box(table)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_suite<T: KeyValuePair, const MAX_SIZE: usize>(c: &mut Criterion) {
    let name = core::any::type_name::<T>();
    let sizes = &SIZES[..=MAX_SIZE];

    let mut group = group_for(c, &format!("insert_random_{name}"));
    for &size in sizes {
        insert_random::<T, FlatHashTable<T>>(&mut group, size, false);
        insert_random::<T, hashbrown::HashTable<T>>(&mut group, size, false);
    }
    group.finish();

    let mut group = group_for(c, &format!("insert_random_preallocated_{name}"));
    for &size in sizes {
        insert_random::<T, FlatHashTable<T>>(&mut group, size, true);
        insert_random::<T, hashbrown::HashTable<T>>(&mut group, size, true);
    }
    group.finish();

    let mut group = group_for(c, &format!("find_hit_miss_{name}"));
    for &size in sizes {
        find_hit_miss::<T, FlatHashTable<T>>(&mut group, size);
        find_hit_miss::<T, hashbrown::HashTable<T>>(&mut group, size);
    }
    group.finish();

    let mut group = group_for(c, &format!("remove_{name}"));
    for &size in sizes {
        remove_all::<T, FlatHashTable<T>>(&mut group, size);
        remove_all::<T, hashbrown::HashTable<T>>(&mut group, size);
    }
    group.finish();

    let mut group = group_for(c, &format!("iteration_{name}"));
    for &size in sizes {
        iterate_and_drain::<T, FlatHashTable<T>>(&mut group, size);
        iterate_and_drain::<T, hashbrown::HashTable<T>>(&mut group, size);
    }
    group.finish();

    let mut group = group_for(c, &format!("churn_{name}"));
    for &size in sizes {
        churn::<T, FlatHashTable<T>>(&mut group, size);
        churn::<T, hashbrown::HashTable<T>>(&mut group, size);
    }
    group.finish();

    for exponent in [1.0, 1.3] {
        let mut group = group_for(c, &format!("mixed_zipf_{exponent:.01}_{name}"));
        for &size in sizes {
            mixed_zipf::<T, FlatHashTable<T>>(&mut group, size, exponent);
            mixed_zipf::<T, hashbrown::HashTable<T>>(&mut group, size, exponent);
        }
        group.finish();
    }
}

criterion_group!(
    benches,
    bench_suite::<SmallItem, 4>,
    bench_suite::<StringItem, 4>,
    bench_suite::<LargeItem, 2>,
);

criterion_main!(benches);
