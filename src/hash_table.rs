use alloc::vec::Vec;
use core::alloc::Layout;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::error::Fallibility;
use crate::error::TryReserveError;
use crate::error::infallible;
use crate::group::GROUP_WIDTH;
use crate::group::Group;
#[cfg(any(test, feature = "stats"))]
use crate::group::SENTINEL_LANE;
use crate::group::Prober;
use crate::group::fingerprint;
use crate::group::home_group;

/// Upper bound on `len / (15 * bucket_count)`.
pub const MAX_LOAD_FACTOR: f32 = 0.875;

/// Scanned in place of real storage by tables that have not allocated yet,
/// so iteration over them hits the sentinel straight away.
static UNALLOCATED_GROUP: Group = Group::SENTINEL_ONLY;

/// `floor(slots * 7 / 8)` without overflowing for large slot counts.
#[inline(always)]
fn target_load_factor(slots: usize) -> usize {
    slots / 8 * 7 + slots % 8 * 7 / 8
}

/// Smallest power-of-two group count whose load limit covers `items`.
fn buckets_for(items: usize) -> Option<usize> {
    let slots = items.checked_mul(8)?.div_ceil(7);
    slots.div_ceil(GROUP_WIDTH).max(1).checked_next_power_of_two()
}

/// Number of erasures tolerated before overflow flags are rebuilt.
#[inline(always)]
fn erase_budget(max_pop: usize) -> usize {
    (max_pop / 8).max(1)
}

/// Walks the probe sequence for `hash` and returns the lowest available lane
/// of the first group that has one. Every full group passed on the way gets
/// its overflow flag for `hash` set.
///
/// The caller must ensure at least one lane is available somewhere in
/// `groups`.
#[inline(always)]
fn place(groups: &mut [Group], bucket_mask: usize, hash: u64) -> Position {
    let mut prober = Prober::new(home_group(hash, bucket_mask));
    loop {
        let group = &mut groups[prober.pos()];
        let available = group.available();
        if available != 0 {
            return Position {
                group: prober.pos(),
                lane: available.trailing_zeros() as usize,
            };
        }

        group.mark_overflow(hash);
        assert!(
            prober.next(bucket_mask),
            "probe sequence found no available lane"
        );
    }
}

#[derive(Debug, Clone, Copy)]
struct DataLayout {
    layout: Layout,
    slots_offset: usize,
}

impl DataLayout {
    const EMPTY: DataLayout = DataLayout {
        layout: Layout::new::<()>(),
        slots_offset: 0,
    };

    fn new<V>(buckets: usize) -> Option<Self> {
        let groups_layout = Layout::array::<Group>(buckets).ok()?;
        let slots_layout =
            Layout::array::<MaybeUninit<V>>(buckets.checked_mul(GROUP_WIDTH)?).ok()?;
        let (layout, slots_offset) = groups_layout.extend(slots_layout).ok()?;

        Some(DataLayout {
            layout: layout.pad_to_align(),
            slots_offset,
        })
    }
}

/// A fresh allocation not yet owned by a table. Dropping it frees the memory
/// without dropping anything stored in its slots.
struct RawBlock {
    layout: DataLayout,
    alloc: NonNull<u8>,
    buckets: usize,
}

impl RawBlock {
    fn allocate<V>(buckets: usize, fallibility: Fallibility) -> Result<Self, TryReserveError> {
        debug_assert!(buckets.is_power_of_two());
        let layout =
            DataLayout::new::<V>(buckets).ok_or_else(|| fallibility.capacity_overflow())?;

        // SAFETY: The layout holds at least one group, so its size is non-zero.
        let raw = unsafe { alloc::alloc::alloc(layout.layout) };
        let Some(alloc) = NonNull::new(raw) else {
            return Err(fallibility.alloc_err(layout.layout));
        };

        let groups = alloc.cast::<Group>();
        // SAFETY: The allocation starts with `buckets` properly aligned groups.
        unsafe {
            for index in 0..buckets {
                groups.add(index).write(Group::EMPTY);
            }
            groups.add(buckets - 1).as_mut().set_sentinel();
        }

        Ok(RawBlock {
            layout,
            alloc,
            buckets,
        })
    }

    fn groups_ptr(&self) -> NonNull<[Group]> {
        NonNull::slice_from_raw_parts(self.alloc.cast(), self.buckets)
    }

    fn slots_ptr<V>(&self) -> NonNull<MaybeUninit<V>> {
        // SAFETY: `slots_offset` lies within the allocation.
        unsafe { self.alloc.add(self.layout.slots_offset).cast() }
    }

    fn into_parts(self) -> (DataLayout, NonNull<u8>) {
        let block = ManuallyDrop::new(self);
        (block.layout, block.alloc)
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        // SAFETY: The block was allocated with exactly this layout.
        unsafe { alloc::alloc::dealloc(self.alloc.as_ptr(), self.layout.layout) }
    }
}

/// The location of an element in a [`HashTable`]: a group index and a lane
/// within that group.
///
/// A position is a plain value. It stays meaningful until the table is
/// resized, rehashed in place, or the element at it is removed. Looking up a
/// stale position through [`HashTable::get_at`] returns `None` or whatever
/// element now occupies that lane; it never reads uninitialized memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    group: usize,
    lane: usize,
}

impl Position {
    /// The group index.
    pub fn group(self) -> usize {
        self.group
    }

    /// The lane within the group, in `0..15`.
    pub fn lane(self) -> usize {
        self.lane
    }

    #[cfg(test)]
    pub(crate) const fn new(group: usize, lane: usize) -> Self {
        Self { group, lane }
    }

    #[inline(always)]
    fn index(self) -> usize {
        self.group * GROUP_WIDTH + self.lane
    }
}

/// Walks occupied lanes group by group until it reaches the sentinel.
struct GroupScan {
    groups: NonNull<Group>,
    group: usize,
    occupied: u16,
}

impl GroupScan {
    /// # Safety
    ///
    /// `groups` must point to a live group array whose last group carries
    /// the sentinel, and `self.group` must index into it.
    #[inline(always)]
    unsafe fn next(&mut self) -> Option<Position> {
        loop {
            if self.occupied != 0 {
                let lane = self.occupied.trailing_zeros() as usize;
                // SAFETY: `self.group` indexes a live group.
                if unsafe { self.groups.add(self.group).as_ref() }.is_sentinel(lane) {
                    // The sentinel bit stays set, so later calls stop here too.
                    return None;
                }
                self.occupied &= self.occupied - 1;
                return Some(Position {
                    group: self.group,
                    lane,
                });
            }

            self.group += 1;
            // SAFETY: The last group always has its sentinel lane occupied, so
            // the scan returns before stepping past it.
            self.occupied = unsafe { self.groups.add(self.group).as_ref() }.occupied();
        }
    }
}

struct RawIter<V> {
    scan: GroupScan,
    slots: NonNull<MaybeUninit<V>>,
    remaining: usize,
}

impl<V> RawIter<V> {
    /// # Safety
    ///
    /// The table this iterator came from must still be alive and must not
    /// have been resized or rehashed.
    #[inline(always)]
    unsafe fn next(&mut self) -> Option<(Position, NonNull<MaybeUninit<V>>)> {
        // SAFETY: Forwarded from the caller.
        let position = unsafe { self.scan.next() }?;
        self.remaining -= 1;
        // SAFETY: Every position the scan yields lies within the slot array.
        Some((position, unsafe { self.slots.add(position.index()) }))
    }
}

// SAFETY: `RawIter` is a pair of raw cursors. The iterator types that wrap it
// carry the borrow or ownership that decides their own auto traits.
unsafe impl<V> Send for RawIter<V> {}
// SAFETY: See above.
unsafe impl<V> Sync for RawIter<V> {}

/// Debug statistics for hash table analysis.
///
/// Available with the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of elements currently in the table
    pub populated: usize,
    /// Maximum number of elements before the table grows
    pub capacity: usize,
    /// Number of groups
    pub bucket_count: usize,
    /// Total number of slots allocated, including the sentinel lane
    pub total_slots: usize,
    /// Number of slots currently occupied
    pub occupied_slots: usize,
    /// Number of groups with at least one overflow flag set
    pub overflowed_groups: usize,
    /// Load factor (populated / total_slots)
    pub load_factor: f64,
    /// Fraction of the growth limit in use (populated / capacity)
    pub capacity_utilization: f64,
    /// Total memory in bytes used by the table
    pub total_bytes: usize,
    /// Memory in bytes held by empty slots
    pub wasted_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Hash Table Debug Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% of capacity)",
            self.populated,
            self.capacity,
            self.capacity_utilization * 100.0
        );
        println!(
            "Slot Usage: {}/{} across {} groups ({:.2}% load factor)",
            self.occupied_slots,
            self.total_slots,
            self.bucket_count,
            self.load_factor * 100.0
        );
        println!(
            "Overflow: {}/{} groups flagged",
            self.overflowed_groups, self.bucket_count
        );
        println!("Total Allocated: {} bytes", self.total_bytes);
        println!(
            "Memory: {} bytes wasted ({:.02}%)",
            self.wasted_bytes,
            if self.total_bytes == 0 {
                0.0
            } else {
                (self.wasted_bytes as f64 / self.total_bytes as f64) * 100.0
            }
        );
    }
}

/// Probe distances for every element of a table.
///
/// `bins[d]` counts the elements that sit `d` probe steps away from their
/// home group. Available with the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeHistogram {
    /// Element counts indexed by probe distance.
    pub bins: Vec<usize>,
}

#[cfg(any(test, feature = "stats"))]
impl ProbeHistogram {
    /// Total number of elements counted.
    pub fn total(&self) -> usize {
        self.bins.iter().sum()
    }

    /// Number of elements living outside their home group.
    pub fn displaced(&self) -> usize {
        self.bins.iter().skip(1).sum()
    }

    /// Pretty-prints the histogram horizontally as a bar chart on stdout.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        let max = self.bins.iter().copied().max().unwrap_or(0);
        if max == 0 {
            println!("probe histogram: empty");
            return;
        }

        let max_bar = 60usize;
        let total_units = max_bar * 8;
        println!("probe histogram ({} entries):", self.total());

        let make_bar = |count: usize| -> alloc::string::String {
            if count == 0 {
                return alloc::string::String::new();
            }
            let units = ((count as u128 * total_units as u128).div_ceil(max as u128)) as usize;
            let mut bar = "█".repeat(units / 8);
            match units % 8 {
                1 => bar.push('▏'),
                2 => bar.push('▎'),
                3 => bar.push('▍'),
                4 => bar.push('▌'),
                5 => bar.push('▋'),
                6 => bar.push('▊'),
                7 => bar.push('▉'),
                _ => {}
            }
            bar
        };

        for (distance, &count) in self.bins.iter().enumerate() {
            println!("{:>3} | {} ({})", distance, make_bar(count), count);
        }
    }
}

/// An open-addressing hash table of 15-slot groups with bit-sliced metadata.
///
/// `HashTable<V>` stores values of type `V`. Like other raw tables, it does
/// not hash anything itself: every operation takes the element's hash and an
/// equality predicate, and operations that may move elements also take a
/// `hasher` closure that recomputes the hash of a stored value.
///
/// Each group keeps one byte of metadata per slot, sliced across two 64-bit
/// words, and eight overflow flags that let a lookup stop at the first group
/// no matching key was ever pushed past. Erasing never leaves a tombstone.
///
/// ## Performance Characteristics
///
/// - **Memory**: 16 bytes of metadata per 15 slots, plus the size of `V` per
///   slot. Hashes are not stored.
/// - **Load factor**: the table grows by doubling its group count before
///   `len` would exceed 7/8 of its slots.
///
/// ## Example
///
/// ```rust
/// # use core::hash::Hash;
/// # use core::hash::Hasher;
/// #
/// # use flat_hash::hash_table::Entry;
/// # use flat_hash::hash_table::HashTable;
/// # use siphasher::sip::SipHasher;
/// #
/// # #[derive(Debug, PartialEq)]
/// # struct Person {
/// #     id: u64,
/// #     name: String,
/// # }
/// #
/// # fn hash_id(id: u64) -> u64 {
/// #     let mut hasher = SipHasher::new();
/// #     id.hash(&mut hasher);
/// #     hasher.finish()
/// # }
///
/// let mut table = HashTable::with_capacity(100);
/// let hash = hash_id(123);
///
/// match table.entry(hash, |p: &Person| p.id == 123, |p| hash_id(p.id)) {
///     Entry::Vacant(entry) => {
///         entry.insert(Person {
///             id: 123,
///             name: "Alice".to_string(),
///         });
///     }
///     Entry::Occupied(_) => {
///         println!("Person already exists");
///     }
/// }
///
/// assert_eq!(table.find(hash, |p| p.id == 123).unwrap().name, "Alice");
/// ```
pub struct HashTable<V> {
    layout: DataLayout,
    alloc: NonNull<u8>,

    populated: usize,
    max_pop: usize,
    bucket_mask: usize,
    /// Erasures left before the overflow flags are rebuilt.
    erase_budget: usize,

    _phantom: PhantomData<V>,
}

// SAFETY: The table owns its elements outright; the raw pointer is never
// shared outside a borrow of the table.
unsafe impl<V: Send> Send for HashTable<V> {}
// SAFETY: Shared access only hands out shared references to elements.
unsafe impl<V: Sync> Sync for HashTable<V> {}

impl<V> Debug for HashTable<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // SAFETY: `groups_ptr` covers exactly the allocated groups.
        let groups = unsafe { self.groups_ptr().as_ref() };
        f.debug_struct("HashTable")
            .field("groups", &groups)
            .field("populated", &self.populated)
            .field("capacity", &self.max_pop)
            .field("bucket_count", &self.bucket_count())
            .finish()
    }
}

impl<V> Clone for HashTable<V>
where
    V: Clone,
{
    fn clone(&self) -> Self {
        let mut new_table = Self::new();
        if !self.is_allocated() {
            return new_table;
        }

        let block = infallible(RawBlock::allocate::<V>(
            self.bucket_mask + 1,
            Fallibility::Infallible,
        ));
        new_table.adopt(block, self.bucket_mask + 1);
        new_table.erase_budget = self.erase_budget;

        // SAFETY: Both tables have the same group count. Each lane is marked
        // occupied in the clone only after its slot is written, so a panicking
        // `clone` leaves a table that drops exactly what it holds.
        unsafe {
            let src_groups = self.groups_ptr().as_ref();
            for (index, src_group) in src_groups.iter().enumerate() {
                let mut occupied = src_group.occupied();
                while occupied != 0 {
                    let lane = occupied.trailing_zeros() as usize;
                    occupied &= occupied - 1;
                    if src_group.is_sentinel(lane) {
                        continue;
                    }

                    let position = Position { group: index, lane };
                    let value = self.slot_ptr(position).as_ref().assume_init_ref().clone();
                    new_table.slot_ptr(position).as_mut().write(value);
                    new_table
                        .groups_ptr()
                        .as_mut()
                        .get_unchecked_mut(index)
                        .set(lane, src_group.code(lane));
                    new_table.populated += 1;
                }

                // Picks up the overflow flags; the lanes already agree.
                *new_table.groups_ptr().as_mut().get_unchecked_mut(index) = *src_group;
            }
        }

        debug_assert_eq!(new_table.populated, self.populated);
        new_table
    }
}

impl<V> Drop for HashTable<V> {
    fn drop(&mut self) {
        // SAFETY: Only occupied lanes are dropped, and the allocation is freed
        // with the layout it was made with.
        unsafe {
            self.drop_elements();
            if self.is_allocated() {
                alloc::alloc::dealloc(self.alloc.as_ptr(), self.layout.layout);
            }
        }
    }
}

impl<V> Default for HashTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> HashTable<V> {
    /// Creates an empty table with a single group and no allocation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use flat_hash::hash_table::HashTable;
    /// #
    /// let table: HashTable<String> = HashTable::new();
    /// assert_eq!(table.bucket_count(), 1);
    /// assert_eq!(table.capacity(), 0);
    /// ```
    pub const fn new() -> Self {
        Self {
            layout: DataLayout::EMPTY,
            alloc: NonNull::dangling(),
            populated: 0,
            max_pop: 0,
            bucket_mask: 0,
            erase_budget: 0,
            _phantom: PhantomData,
        }
    }

    /// Creates a new hash table able to hold at least `capacity` elements
    /// without growing.
    ///
    /// The group count is the smallest power of two whose 7/8 load limit
    /// covers `capacity`.
    ///
    /// # Panics
    ///
    /// Panics if the required size overflows `isize::MAX` bytes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use flat_hash::hash_table::HashTable;
    /// #
    /// let table: HashTable<String> = HashTable::with_capacity(1000);
    /// assert!(table.capacity() >= 1000);
    /// assert_eq!(table.bucket_count(), 128);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        infallible(Self::with_capacity_impl(capacity, Fallibility::Infallible))
    }

    /// Fallible version of [`with_capacity`](Self::with_capacity).
    pub fn try_with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        Self::with_capacity_impl(capacity, Fallibility::Fallible)
    }

    fn with_capacity_impl(
        capacity: usize,
        fallibility: Fallibility,
    ) -> Result<Self, TryReserveError> {
        let mut table = Self::new();
        if capacity == 0 {
            return Ok(table);
        }

        let buckets = buckets_for(capacity).ok_or_else(|| fallibility.capacity_overflow())?;
        let block = RawBlock::allocate::<V>(buckets, fallibility)?;
        table.adopt(block, buckets);
        Ok(table)
    }

    /// Installs `block` as this table's storage. The previous storage must
    /// already have been released or moved out.
    fn adopt(&mut self, block: RawBlock, buckets: usize) {
        let (layout, alloc) = block.into_parts();
        self.layout = layout;
        self.alloc = alloc;
        self.bucket_mask = buckets - 1;
        self.max_pop = target_load_factor(buckets * GROUP_WIDTH);
        self.erase_budget = erase_budget(self.max_pop);
    }

    #[inline(always)]
    fn is_allocated(&self) -> bool {
        self.layout.layout.size() != 0
    }

    #[inline(always)]
    fn allocated_groups(&self) -> usize {
        if self.is_allocated() {
            self.bucket_mask + 1
        } else {
            0
        }
    }

    #[inline(always)]
    fn groups_ptr(&self) -> NonNull<[Group]> {
        let base = if self.is_allocated() {
            self.alloc.cast()
        } else {
            NonNull::dangling()
        };
        NonNull::slice_from_raw_parts(base, self.allocated_groups())
    }

    #[inline(always)]
    fn slots_base(&self) -> NonNull<MaybeUninit<V>> {
        if self.is_allocated() {
            // SAFETY: `slots_offset` lies within the allocation.
            unsafe { self.alloc.add(self.layout.slots_offset).cast() }
        } else {
            NonNull::dangling()
        }
    }

    /// # Safety
    ///
    /// `position` must lie within the allocated groups.
    #[inline(always)]
    unsafe fn slot_ptr(&self, position: Position) -> NonNull<MaybeUninit<V>> {
        debug_assert!(position.group < self.allocated_groups());
        // SAFETY: Forwarded from the caller.
        unsafe { self.slots_base().add(position.index()) }
    }

    fn scan(&self) -> GroupScan {
        if self.is_allocated() {
            let groups = self.alloc.cast::<Group>();
            // SAFETY: An allocated table has at least one group.
            let occupied = unsafe { groups.as_ref() }.occupied();
            GroupScan {
                groups,
                group: 0,
                occupied,
            }
        } else {
            GroupScan {
                groups: NonNull::from(&UNALLOCATED_GROUP),
                group: 0,
                occupied: UNALLOCATED_GROUP.occupied(),
            }
        }
    }

    fn raw_iter(&self) -> RawIter<V> {
        RawIter {
            scan: self.scan(),
            slots: self.slots_base(),
            remaining: self.populated,
        }
    }

    /// # Safety
    ///
    /// Must be followed by releasing or resetting the storage; the lanes are
    /// left marked occupied.
    unsafe fn drop_elements(&mut self) {
        if core::mem::needs_drop::<V>() && self.populated > 0 {
            let mut iter = self.raw_iter();
            // SAFETY: The iterator yields initialized slots only.
            unsafe {
                while let Some((_, mut slot)) = iter.next() {
                    slot.as_mut().assume_init_drop();
                }
            }
        }
    }

    /// Returns the number of elements in the table.
    pub fn len(&self) -> usize {
        self.populated
    }

    /// Returns `true` if the table contains no elements.
    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Returns the number of elements the table can hold before it grows.
    ///
    /// This is `floor(0.875 * 15 * bucket_count())` once storage has been
    /// allocated, and `0` before that.
    pub fn capacity(&self) -> usize {
        self.max_pop
    }

    /// Returns the number of groups. Always a power of two and at least 1.
    pub fn bucket_count(&self) -> usize {
        self.bucket_mask + 1
    }

    /// Returns the fixed maximum load factor, 0.875.
    pub fn max_load_factor(&self) -> f32 {
        MAX_LOAD_FACTOR
    }

    /// Finds the position of the element matching `hash` and `eq`.
    ///
    /// Probing stops at the first group whose overflow flag for `hash` is
    /// clear, or after every group has been visited.
    pub fn find_position(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<Position> {
        if self.populated == 0 {
            return None;
        }

        let code = fingerprint(hash);
        let mut prober = Prober::new(home_group(hash, self.bucket_mask));
        // SAFETY: A populated table is allocated.
        let groups = unsafe { self.groups_ptr().as_ref() };
        loop {
            // SAFETY: Prober positions are masked to the group count.
            let group = unsafe { groups.get_unchecked(prober.pos()) };
            let mut matches = group.matches(code);
            while matches != 0 {
                let lane = matches.trailing_zeros() as usize;
                matches &= matches - 1;

                let position = Position {
                    group: prober.pos(),
                    lane,
                };
                // SAFETY: Matching lanes hold occupied codes, so their slots
                // are initialized.
                if eq(unsafe { self.slot_ptr(position).as_ref().assume_init_ref() }) {
                    return Some(position);
                }
            }

            if !group.is_overflowed(hash) || !prober.next(self.bucket_mask) {
                return None;
            }
        }
    }

    /// Finds a value by hash and equality predicate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::Hash;
    /// # use core::hash::Hasher;
    /// #
    /// # use flat_hash::hash_table::HashTable;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # fn hash_str(s: &str) -> u64 {
    /// #     let mut hasher = SipHasher::new();
    /// #     s.hash(&mut hasher);
    /// #     hasher.finish()
    /// # }
    /// #
    /// let mut table = HashTable::new();
    /// table
    ///     .entry(hash_str("key"), |s: &String| s == "key", |s| hash_str(s))
    ///     .or_insert("key".to_string());
    ///
    /// assert!(table.find(hash_str("key"), |s| s == "key").is_some());
    /// assert!(table.find(hash_str("nope"), |s| s == "nope").is_none());
    /// ```
    pub fn find(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<&V> {
        let position = self.find_position(hash, eq)?;
        // SAFETY: `find_position` only returns occupied positions.
        Some(unsafe { self.slot_ptr(position).as_ref().assume_init_ref() })
    }

    /// Finds a value by hash and equality predicate, returning a mutable
    /// reference.
    ///
    /// The hash of the value must not change through the returned reference.
    pub fn find_mut(&mut self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<&mut V> {
        let position = self.find_position(hash, eq)?;
        // SAFETY: `find_position` only returns occupied positions.
        Some(unsafe { self.slot_ptr(position).as_mut().assume_init_mut() })
    }

    /// Returns `true` if `position` currently refers to an element.
    fn is_occupied(&self, position: Position) -> bool {
        if position.group >= self.allocated_groups() || position.lane >= GROUP_WIDTH {
            return false;
        }
        // SAFETY: Bounds checked above.
        let group = unsafe { self.groups_ptr().as_ref().get_unchecked(position.group) };
        group.occupied() & (1 << position.lane) != 0 && !group.is_sentinel(position.lane)
    }

    /// Returns the element at `position`, or `None` if that lane is empty or
    /// out of range.
    pub fn get_at(&self, position: Position) -> Option<&V> {
        if !self.is_occupied(position) {
            return None;
        }
        // SAFETY: The lane is occupied.
        Some(unsafe { self.slot_ptr(position).as_ref().assume_init_ref() })
    }

    /// Mutable version of [`get_at`](Self::get_at).
    pub fn get_at_mut(&mut self, position: Position) -> Option<&mut V> {
        if !self.is_occupied(position) {
            return None;
        }
        // SAFETY: The lane is occupied.
        Some(unsafe { self.slot_ptr(position).as_mut().assume_init_mut() })
    }

    /// Gets the entry for the element matching `hash` and `eq`.
    ///
    /// On a miss, the table makes room for one more element before returning
    /// the vacant entry. `hasher` must return the hash each stored value was
    /// inserted with; it is used to move elements while growing or rebuilding
    /// overflow flags.
    ///
    /// # Panics
    ///
    /// Panics if the new capacity overflows `isize::MAX` bytes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::Hash;
    /// # use core::hash::Hasher;
    /// #
    /// # use flat_hash::hash_table::Entry;
    /// # use flat_hash::hash_table::HashTable;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # fn hash_str(s: &str) -> u64 {
    /// #     let mut hasher = SipHasher::new();
    /// #     s.hash(&mut hasher);
    /// #     hasher.finish()
    /// # }
    /// #
    /// let mut table = HashTable::new();
    /// let hash = hash_str("key");
    ///
    /// match table.entry(hash, |s: &String| s == "key", |s| hash_str(s)) {
    ///     Entry::Vacant(entry) => {
    ///         entry.insert("key".to_string());
    ///     }
    ///     Entry::Occupied(_) => unreachable!(),
    /// }
    ///
    /// assert!(matches!(
    ///     table.entry(hash, |s: &String| s == "key", |s| hash_str(s)),
    ///     Entry::Occupied(_)
    /// ));
    /// ```
    pub fn entry(
        &mut self,
        hash: u64,
        eq: impl Fn(&V) -> bool,
        hasher: impl Fn(&V) -> u64,
    ) -> Entry<'_, V> {
        infallible(self.entry_impl(hash, eq, hasher, Fallibility::Infallible))
    }

    /// Fallible version of [`entry`](Self::entry). Returns an error instead
    /// of panicking or aborting if the table cannot grow.
    pub fn try_entry(
        &mut self,
        hash: u64,
        eq: impl Fn(&V) -> bool,
        hasher: impl Fn(&V) -> u64,
    ) -> Result<Entry<'_, V>, TryReserveError> {
        self.entry_impl(hash, eq, hasher, Fallibility::Fallible)
    }

    fn entry_impl(
        &mut self,
        hash: u64,
        eq: impl Fn(&V) -> bool,
        hasher: impl Fn(&V) -> u64,
        fallibility: Fallibility,
    ) -> Result<Entry<'_, V>, TryReserveError> {
        if let Some(position) = self.find_position(hash, &eq) {
            return Ok(Entry::Occupied(OccupiedEntry {
                table: self,
                position,
            }));
        }

        self.reserve_impl(1, &hasher, fallibility)?;
        Ok(Entry::Vacant(VacantEntry { table: self, hash }))
    }

    /// Inserts `value` without checking whether an equal element exists.
    ///
    /// Inserting a duplicate this way leaves both elements in the table;
    /// which one a lookup finds is unspecified.
    pub fn insert_unique(
        &mut self,
        hash: u64,
        value: V,
        hasher: impl Fn(&V) -> u64,
    ) -> (Position, &mut V) {
        infallible(self.reserve_impl(1, &hasher, Fallibility::Infallible));
        // SAFETY: Room for one more element was just reserved.
        unsafe { self.insert_reserved(hash, value) }
    }

    /// # Safety
    ///
    /// The table must be allocated with `len() < capacity()`.
    #[inline(always)]
    unsafe fn insert_reserved(&mut self, hash: u64, value: V) -> (Position, &mut V) {
        debug_assert!(self.populated < self.max_pop);
        // SAFETY: The table is allocated, and below its load limit at least one
        // lane is available.
        unsafe {
            let groups = self.groups_ptr().as_mut();
            let position = place(groups, self.bucket_mask, hash);
            groups
                .get_unchecked_mut(position.group)
                .set(position.lane, fingerprint(hash));
            self.populated += 1;
            (position, self.slot_ptr(position).as_mut().write(value))
        }
    }

    /// Removes and returns the element matching `hash` and `eq`.
    ///
    /// No other element moves.
    pub fn remove(&mut self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<V> {
        let position = self.find_position(hash, eq)?;
        // SAFETY: `find_position` only returns occupied positions.
        Some(unsafe { self.take_at(position) })
    }

    /// Removes and returns the element at `position`.
    ///
    /// # Panics
    ///
    /// Panics if `position` does not refer to an element, including the
    /// sentinel lane.
    pub fn remove_at(&mut self, position: Position) -> V {
        assert!(
            self.is_occupied(position),
            "{position:?} does not refer to an element"
        );
        // SAFETY: Checked above.
        unsafe { self.take_at(position) }
    }

    /// Drops the element at `position` and returns the position of the next
    /// element in iteration order, if any.
    ///
    /// # Panics
    ///
    /// Panics if `position` does not refer to an element.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use flat_hash::hash_table::HashTable;
    /// #
    /// let mut table = HashTable::new();
    /// for n in 0..20u64 {
    ///     table.insert_unique(n.wrapping_mul(0x9E37_79B9_7F4A_7C15), n, |v| {
    ///         v.wrapping_mul(0x9E37_79B9_7F4A_7C15)
    ///     });
    /// }
    ///
    /// let mut cursor = table.first_position();
    /// while let Some(position) = cursor {
    ///     cursor = if table.get_at(position).is_some_and(|v| v % 2 == 0) {
    ///         table.erase(position)
    ///     } else {
    ///         table.next_position(position)
    ///     };
    /// }
    /// assert_eq!(table.len(), 10);
    /// ```
    pub fn erase(&mut self, position: Position) -> Option<Position> {
        drop(self.remove_at(position));
        self.next_position(position)
    }

    /// # Safety
    ///
    /// `position` must refer to an element.
    #[inline(always)]
    unsafe fn take_at(&mut self, position: Position) -> V {
        // SAFETY: Forwarded from the caller. The lane is cleared before the
        // value is read out, so the table never drops it again.
        unsafe {
            self.groups_ptr()
                .as_mut()
                .get_unchecked_mut(position.group)
                .reset(position.lane);
            self.populated -= 1;
            self.erase_budget = self.erase_budget.saturating_sub(1);
            self.slot_ptr(position).as_ref().assume_init_read()
        }
    }

    /// Keeps only the elements for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&mut V) -> bool) {
        let mut cursor = self.first_position();
        while let Some(position) = cursor {
            // SAFETY: The cursor only yields occupied positions, and erasing
            // never moves other elements.
            let value = unsafe { self.slot_ptr(position).as_mut().assume_init_mut() };
            cursor = if keep(value) {
                self.next_position(position)
            } else {
                self.erase(position)
            };
        }
    }

    /// Makes room for at least `additional` more elements.
    ///
    /// Also runs a pending overflow-flag rebuild.
    ///
    /// # Panics
    ///
    /// Panics if the new capacity overflows `isize::MAX` bytes.
    pub fn reserve(&mut self, additional: usize, hasher: impl Fn(&V) -> u64) {
        infallible(self.reserve_impl(additional, &hasher, Fallibility::Infallible))
    }

    /// Fallible version of [`reserve`](Self::reserve).
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use flat_hash::error::TryReserveError;
    /// # use flat_hash::hash_table::HashTable;
    /// #
    /// let mut table: HashTable<u64> = HashTable::new();
    /// assert_eq!(
    ///     table.try_reserve(usize::MAX, |v| *v),
    ///     Err(TryReserveError::CapacityOverflow)
    /// );
    /// assert!(table.try_reserve(100, |v| *v).is_ok());
    /// assert!(table.capacity() >= 100);
    /// ```
    pub fn try_reserve(
        &mut self,
        additional: usize,
        hasher: impl Fn(&V) -> u64,
    ) -> Result<(), TryReserveError> {
        self.reserve_impl(additional, &hasher, Fallibility::Fallible)
    }

    fn reserve_impl(
        &mut self,
        additional: usize,
        hasher: &impl Fn(&V) -> u64,
        fallibility: Fallibility,
    ) -> Result<(), TryReserveError> {
        let required = self
            .populated
            .checked_add(additional)
            .ok_or_else(|| fallibility.capacity_overflow())?;

        if required > self.max_pop {
            let buckets = buckets_for(required).ok_or_else(|| fallibility.capacity_overflow())?;
            self.resize(buckets, hasher, fallibility)
        } else {
            if self.erase_budget == 0 && self.is_allocated() {
                self.rehash_in_place(hasher);
            }
            Ok(())
        }
    }

    /// Moves every element into fresh storage of `buckets` groups.
    ///
    /// Elements are copied out bitwise and the old storage is only released
    /// once all of them have been placed, so a panicking `hasher` leaves the
    /// table as it was.
    #[cold]
    #[inline(never)]
    fn resize(
        &mut self,
        buckets: usize,
        hasher: &impl Fn(&V) -> u64,
        fallibility: Fallibility,
    ) -> Result<(), TryReserveError> {
        let block = RawBlock::allocate::<V>(buckets, fallibility)?;
        let new_mask = buckets - 1;

        // SAFETY: The old storage is read through occupied lanes only, and each
        // destination lane is an available lane of the fresh block.
        unsafe {
            let new_groups = block.groups_ptr().as_mut();
            let new_slots = block.slots_ptr::<V>();
            let mut iter = self.raw_iter();
            while let Some((_, slot)) = iter.next() {
                let hash = hasher(slot.as_ref().assume_init_ref());
                let position = place(new_groups, new_mask, hash);
                new_groups
                    .get_unchecked_mut(position.group)
                    .set(position.lane, fingerprint(hash));
                core::ptr::copy_nonoverlapping(
                    slot.as_ptr(),
                    new_slots.add(position.index()).as_ptr(),
                    1,
                );
            }
        }

        let old_groups = self.allocated_groups();
        let old_layout = self.layout;
        let old_alloc = self.alloc;
        self.adopt(block, buckets);
        if old_layout.layout.size() != 0 {
            // SAFETY: Every element has been moved out; only the memory remains.
            unsafe { alloc::alloc::dealloc(old_alloc.as_ptr(), old_layout.layout) };
        }

        log::trace!(
            "resized hash table from {} to {} groups holding {} elements",
            old_groups,
            buckets,
            self.populated
        );
        Ok(())
    }

    /// Rebuilds the overflow flags without allocating.
    ///
    /// Clears every flag, then takes each element that is not in its home
    /// group out of its lane and places it again. Hashes are computed before
    /// anything is touched, so a panicking `hasher` leaves the table as it
    /// was.
    #[cold]
    #[inline(never)]
    fn rehash_in_place(&mut self, hasher: &impl Fn(&V) -> u64) {
        let bucket_mask = self.bucket_mask;
        let mut displaced = Vec::new();

        // SAFETY: The iterator yields initialized slots only.
        unsafe {
            let mut iter = self.raw_iter();
            while let Some((position, slot)) = iter.next() {
                let hash = hasher(slot.as_ref().assume_init_ref());
                if home_group(hash, bucket_mask) != position.group {
                    displaced.push((position, hash));
                }
            }
        }

        // SAFETY: Each displaced element leaves its lane before being placed
        // again, so `place` always finds a lane. A destination is never the
        // lane of an element still waiting to move, since those stay occupied.
        unsafe {
            let groups = self.groups_ptr().as_mut();
            for group in groups.iter_mut() {
                group.clear_overflow();
            }

            let slots = self.slots_base();
            for &(from, hash) in &displaced {
                groups.get_unchecked_mut(from.group).reset(from.lane);
                let to = place(groups, bucket_mask, hash);
                groups
                    .get_unchecked_mut(to.group)
                    .set(to.lane, fingerprint(hash));
                if to != from {
                    core::ptr::copy_nonoverlapping(
                        slots.add(from.index()).as_ptr(),
                        slots.add(to.index()).as_ptr(),
                        1,
                    );
                }
            }
        }

        self.erase_budget = erase_budget(self.max_pop);
        log::trace!(
            "rebuilt overflow flags: re-placed {} of {} elements across {} groups",
            displaced.len(),
            self.populated,
            bucket_mask + 1
        );
    }

    /// Removes all elements and releases the storage, returning the table to
    /// its unallocated single-group state.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use flat_hash::hash_table::HashTable;
    /// #
    /// let mut table = HashTable::with_capacity(500);
    /// table.insert_unique(7, 7u64, |v| *v);
    /// table.clear();
    /// assert!(table.is_empty());
    /// assert_eq!(table.bucket_count(), 1);
    /// assert_eq!(table.capacity(), 0);
    /// ```
    pub fn clear(&mut self) {
        if !self.is_allocated() {
            return;
        }

        let buckets = self.bucket_mask + 1;
        let populated = self.populated;
        let mut iter = self.raw_iter();
        let block = RawBlock {
            layout: self.layout,
            alloc: self.alloc,
            buckets,
        };
        core::mem::forget(core::mem::replace(self, Self::new()));

        // SAFETY: The storage now belongs to `block` alone, which frees it even
        // if dropping an element panics.
        unsafe {
            if core::mem::needs_drop::<V>() {
                while let Some((_, mut slot)) = iter.next() {
                    slot.as_mut().assume_init_drop();
                }
            }
        }
        drop(block);

        log::debug!(
            "cleared hash table: released {} groups, dropped {} elements",
            buckets,
            populated
        );
    }

    /// Returns the position of the first element in iteration order.
    pub fn first_position(&self) -> Option<Position> {
        let mut scan = self.scan();
        // SAFETY: `scan` covers live groups ending in a sentinel.
        unsafe { scan.next() }
    }

    /// Returns the position of the element after `position` in iteration
    /// order.
    ///
    /// `position` itself does not need to be occupied, so this is valid right
    /// after the element there was removed.
    pub fn next_position(&self, position: Position) -> Option<Position> {
        if position.group >= self.allocated_groups() || position.lane >= GROUP_WIDTH {
            return None;
        }

        let groups = self.alloc.cast::<Group>();
        // SAFETY: Bounds checked above.
        let group = unsafe { groups.add(position.group).as_ref() };
        // The scan past the sentinel would leave the group array.
        if group.is_sentinel(position.lane) {
            return None;
        }
        let visited = ((2u32 << position.lane) - 1) as u16;
        let occupied = group.occupied() & !visited;
        let mut scan = GroupScan {
            groups,
            group: position.group,
            occupied,
        };
        // SAFETY: `scan` starts inside live groups ending in a sentinel.
        unsafe { scan.next() }
    }

    /// Returns an iterator over all elements, in metadata order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use flat_hash::hash_table::HashTable;
    /// #
    /// let mut table = HashTable::new();
    /// table.insert_unique(1, 10u32, |v| *v as u64 / 10);
    /// table.insert_unique(2, 20u32, |v| *v as u64 / 10);
    ///
    /// let mut values: Vec<_> = table.iter().copied().collect();
    /// values.sort();
    /// assert_eq!(values, [10, 20]);
    /// ```
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            raw: self.raw_iter(),
            _marker: PhantomData,
        }
    }

    /// Returns an iterator yielding mutable references to all elements.
    ///
    /// The hash of a value must not change through the returned references.
    pub fn iter_mut(&mut self) -> IterMut<'_, V> {
        IterMut {
            raw: self.raw_iter(),
            _marker: PhantomData,
        }
    }

    /// Removes all elements, yielding them by value. The storage is kept.
    ///
    /// If the iterator is dropped early, the remaining elements are dropped
    /// with it.
    pub fn drain(&mut self) -> Drain<'_, V> {
        Drain {
            raw: self.raw_iter(),
            table: self,
        }
    }

    /// Computes the probe distance of every element.
    ///
    /// `hasher` must return the hash each value was inserted with.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_histogram(&self, hasher: impl Fn(&V) -> u64) -> ProbeHistogram {
        let mut bins = Vec::new();
        let mut iter = self.raw_iter();
        // SAFETY: The iterator yields initialized slots only.
        while let Some((position, slot)) = unsafe { iter.next() } {
            let hash = hasher(unsafe { slot.as_ref().assume_init_ref() });
            let mut prober = Prober::new(home_group(hash, self.bucket_mask));
            let mut distance = 0;
            while prober.pos() != position.group {
                prober.next(self.bucket_mask);
                distance += 1;
            }

            if bins.len() <= distance {
                bins.resize(distance + 1, 0);
            }
            bins[distance] += 1;
        }

        ProbeHistogram { bins }
    }

    /// Returns occupancy and memory statistics.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        // SAFETY: `groups_ptr` covers exactly the allocated groups.
        let groups = unsafe { self.groups_ptr().as_ref() };
        let total_slots = groups.len() * GROUP_WIDTH;

        let mut occupied_slots = 0;
        let mut overflowed_groups = 0;
        for (index, group) in groups.iter().enumerate() {
            let mut occupied = group.occupied();
            if index + 1 == groups.len() {
                occupied &= !(1 << SENTINEL_LANE);
            }
            occupied_slots += occupied.count_ones() as usize;
            if group.overflow_flags() != 0 {
                overflowed_groups += 1;
            }
        }

        DebugStats {
            populated: self.populated,
            capacity: self.max_pop,
            bucket_count: self.bucket_count(),
            total_slots,
            occupied_slots,
            overflowed_groups,
            load_factor: if total_slots == 0 {
                0.0
            } else {
                self.populated as f64 / total_slots as f64
            },
            capacity_utilization: if self.max_pop == 0 {
                0.0
            } else {
                self.populated as f64 / self.max_pop as f64
            },
            total_bytes: self.layout.layout.size(),
            wasted_bytes: (total_slots - occupied_slots) * core::mem::size_of::<V>(),
        }
    }
}

/// A view into a single entry in the hash table, which may be vacant or
/// occupied.
///
/// This enum is constructed from the [`entry`] method on [`HashTable`].
///
/// [`entry`]: HashTable::entry
///
/// # Examples
///
/// ```rust
/// # use core::hash::Hash;
/// # use core::hash::Hasher;
/// #
/// # use flat_hash::hash_table::Entry;
/// # use flat_hash::hash_table::HashTable;
/// # use siphasher::sip::SipHasher;
/// #
/// # fn hash_str(s: &str) -> u64 {
/// #     let mut hasher = SipHasher::new();
/// #     s.hash(&mut hasher);
/// #     hasher.finish()
/// # }
///
/// let mut table = HashTable::with_capacity(10);
/// let hash = hash_str("key");
///
/// match table.entry(hash, |s: &String| s == "key", |s| hash_str(s)) {
///     Entry::Vacant(entry) => {
///         entry.insert("key".to_string());
///     }
///     Entry::Occupied(entry) => {
///         println!("Key already exists with value: {}", entry.get());
///     }
/// }
/// ```
pub enum Entry<'a, V> {
    /// The element is not in the table
    Vacant(VacantEntry<'a, V>),
    /// The element is in the table
    Occupied(OccupiedEntry<'a, V>),
}

impl<'a, V> Entry<'a, V> {
    /// Inserts `default` if the entry is vacant and returns a mutable
    /// reference to the value in the entry.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::Hash;
    /// # use core::hash::Hasher;
    /// #
    /// # use flat_hash::hash_table::HashTable;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # fn hash_str(s: &str) -> u64 {
    /// #     let mut hasher = SipHasher::new();
    /// #     s.hash(&mut hasher);
    /// #     hasher.finish()
    /// # }
    /// #
    /// let mut table = HashTable::new();
    /// let hash = hash_str("key");
    ///
    /// let value = table
    ///     .entry(hash, |s: &String| s == "key", |s| hash_str(s))
    ///     .or_insert("key".to_string());
    /// assert_eq!(value, "key");
    ///
    /// let existing = table
    ///     .entry(hash, |s: &String| s == "key", |s| hash_str(s))
    ///     .or_insert("other".to_string());
    /// assert_eq!(existing, "key");
    /// ```
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Inserts the result of `default` if the entry is vacant. `default` is
    /// not called otherwise.
    pub fn or_insert_with(self, default: impl FnOnce() -> V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Calls `f` on the value if the entry is occupied.
    pub fn and_modify(self, f: impl FnOnce(&mut V)) -> Self {
        match self {
            Entry::Occupied(mut entry) => {
                f(entry.get_mut());
                Entry::Occupied(entry)
            }
            vacant => vacant,
        }
    }

    /// Inserts `V::default()` if the entry is vacant.
    pub fn or_default(self) -> &'a mut V
    where
        V: Default,
    {
        self.or_insert_with(V::default)
    }
}

/// A view into a vacant entry in a [`HashTable`]. Room for the element has
/// already been reserved.
pub struct VacantEntry<'a, V> {
    table: &'a mut HashTable<V>,
    hash: u64,
}

impl<'a, V> VacantEntry<'a, V> {
    /// Inserts `value` and returns a mutable reference to it.
    ///
    /// The value lands in the lowest available lane of the first group along
    /// its probe sequence that has one.
    pub fn insert(self, value: V) -> &'a mut V {
        self.insert_entry(value).into_mut()
    }

    /// Inserts `value` and returns the occupied entry for it.
    pub fn insert_entry(self, value: V) -> OccupiedEntry<'a, V> {
        // SAFETY: Creating the vacant entry reserved room for one element.
        let (position, _) = unsafe { self.table.insert_reserved(self.hash, value) };
        OccupiedEntry {
            table: self.table,
            position,
        }
    }

    /// The hash this entry was looked up with.
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

/// A view into an occupied entry in a [`HashTable`].
pub struct OccupiedEntry<'a, V> {
    table: &'a mut HashTable<V>,
    position: Position,
}

impl<'a, V> OccupiedEntry<'a, V> {
    /// Gets a reference to the value in the entry.
    pub fn get(&self) -> &V {
        // SAFETY: The entry's position was found occupied and the table has
        // been exclusively borrowed since.
        unsafe { self.table.slot_ptr(self.position).as_ref().assume_init_ref() }
    }

    /// Gets a mutable reference to the value in the entry.
    pub fn get_mut(&mut self) -> &mut V {
        // SAFETY: As in `get`.
        unsafe { self.table.slot_ptr(self.position).as_mut().assume_init_mut() }
    }

    /// Converts the entry into a mutable reference tied to the table borrow.
    pub fn into_mut(self) -> &'a mut V {
        // SAFETY: As in `get`.
        unsafe { self.table.slot_ptr(self.position).as_mut().assume_init_mut() }
    }

    /// The position of the element.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Removes the element from the table and returns it.
    pub fn remove(self) -> V {
        // SAFETY: The entry's position is occupied.
        unsafe { self.table.take_at(self.position) }
    }
}

/// An iterator over the elements of a [`HashTable`].
///
/// This struct is created by the [`iter`] method on [`HashTable`].
///
/// [`iter`]: HashTable::iter
pub struct Iter<'a, V> {
    raw: RawIter<V>,
    _marker: PhantomData<&'a V>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = &'a V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: The table is borrowed for `'a`, so its storage is stable.
        unsafe {
            let (_, slot) = self.raw.next()?;
            Some(slot.as_ref().assume_init_ref())
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.raw.remaining, Some(self.raw.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}
impl<V> core::iter::FusedIterator for Iter<'_, V> {}

/// A mutable iterator over the elements of a [`HashTable`].
pub struct IterMut<'a, V> {
    raw: RawIter<V>,
    _marker: PhantomData<&'a mut V>,
}

impl<'a, V> Iterator for IterMut<'a, V> {
    type Item = &'a mut V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: The table is exclusively borrowed for `'a` and each slot is
        // yielded once.
        unsafe {
            let (_, mut slot) = self.raw.next()?;
            Some(slot.as_mut().assume_init_mut())
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.raw.remaining, Some(self.raw.remaining))
    }
}

impl<V> ExactSizeIterator for IterMut<'_, V> {}
impl<V> core::iter::FusedIterator for IterMut<'_, V> {}

/// A draining iterator over the elements of a [`HashTable`].
///
/// This struct is created by the [`drain`] method on [`HashTable`].
///
/// [`drain`]: HashTable::drain
pub struct Drain<'a, V> {
    table: &'a mut HashTable<V>,
    raw: RawIter<V>,
}

impl<V> Drop for Drain<'_, V> {
    fn drop(&mut self) {
        for _ in &mut *self {}

        // SAFETY: Every lane is empty now; only the flags remain.
        unsafe {
            for group in self.table.groups_ptr().as_mut() {
                group.clear_overflow();
            }
        }
        self.table.erase_budget = erase_budget(self.table.max_pop);
    }
}

impl<V> Iterator for Drain<'_, V> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: The table is exclusively borrowed and never resized while
        // draining. Each lane is cleared before its value is read out.
        unsafe {
            let (position, slot) = self.raw.next()?;
            self.table
                .groups_ptr()
                .as_mut()
                .get_unchecked_mut(position.group)
                .reset(position.lane);
            self.table.populated -= 1;
            Some(slot.as_ref().assume_init_read())
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.raw.remaining, Some(self.raw.remaining))
    }
}

impl<V> ExactSizeIterator for Drain<'_, V> {}
impl<V> core::iter::FusedIterator for Drain<'_, V> {}

/// An owning iterator over the elements of a [`HashTable`].
pub struct IntoIter<V> {
    table: HashTable<V>,
    raw: RawIter<V>,
}

impl<V> Iterator for IntoIter<V> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: The iterator owns the table. Each lane is cleared before its
        // value is read out, so the table's drop skips it.
        unsafe {
            let (position, slot) = self.raw.next()?;
            self.table
                .groups_ptr()
                .as_mut()
                .get_unchecked_mut(position.group)
                .reset(position.lane);
            self.table.populated -= 1;
            Some(slot.as_ref().assume_init_read())
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.raw.remaining, Some(self.raw.remaining))
    }
}

impl<V> ExactSizeIterator for IntoIter<V> {}
impl<V> core::iter::FusedIterator for IntoIter<V> {}

impl<V> IntoIterator for HashTable<V> {
    type Item = V;
    type IntoIter = IntoIter<V>;

    fn into_iter(self) -> IntoIter<V> {
        IntoIter {
            raw: self.raw_iter(),
            table: self,
        }
    }
}

impl<'a, V> IntoIterator for &'a HashTable<V> {
    type Item = &'a V;
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Iter<'a, V> {
        self.iter()
    }
}

impl<'a, V> IntoIterator for &'a mut HashTable<V> {
    type Item = &'a mut V;
    type IntoIter = IterMut<'a, V>;

    fn into_iter(self) -> IterMut<'a, V> {
        self.iter_mut()
    }
}
