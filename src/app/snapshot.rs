use serde::Serialize;

pub const CATEGORY_COUNT: usize = 16;

/// The closed set of `dumpsys meminfo` breakdown buckets. Anything a vendor
/// dump adds beyond these is ignored rather than accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    NativeHeap,
    DalvikHeap,
    DalvikOther,
    Stack,
    Ashmem,
    OtherDev,
    SoMmap,
    JarMmap,
    ApkMmap,
    TtfMmap,
    DexMmap,
    OatMmap,
    ArtMmap,
    OtherMmap,
    GlMtrack,
    Unknown,
}

impl Category {
    pub const ALL: [Category; CATEGORY_COUNT] = [
        Category::NativeHeap,
        Category::DalvikHeap,
        Category::DalvikOther,
        Category::Stack,
        Category::Ashmem,
        Category::OtherDev,
        Category::SoMmap,
        Category::JarMmap,
        Category::ApkMmap,
        Category::TtfMmap,
        Category::DexMmap,
        Category::OatMmap,
        Category::ArtMmap,
        Category::OtherMmap,
        Category::GlMtrack,
        Category::Unknown,
    ];

    /// The label as it appears in the dump text.
    pub fn label(self) -> &'static str {
        match self {
            Category::NativeHeap => "Native Heap",
            Category::DalvikHeap => "Dalvik Heap",
            Category::DalvikOther => "Dalvik Other",
            Category::Stack => "Stack",
            Category::Ashmem => "Ashmem",
            Category::OtherDev => "Other dev",
            Category::SoMmap => ".so mmap",
            Category::JarMmap => ".jar mmap",
            Category::ApkMmap => ".apk mmap",
            Category::TtfMmap => ".ttf mmap",
            Category::DexMmap => ".dex mmap",
            Category::OatMmap => ".oat mmap",
            Category::ArtMmap => ".art mmap",
            Category::OtherMmap => "Other mmap",
            Category::GlMtrack => "GL mtrack",
            Category::Unknown => "Unknown",
        }
    }

    /// Store column name for this bucket.
    pub fn column(self) -> &'static str {
        match self {
            Category::NativeHeap => "native_heap",
            Category::DalvikHeap => "dalvik_heap",
            Category::DalvikOther => "dalvik_other",
            Category::Stack => "stack",
            Category::Ashmem => "ashmem",
            Category::OtherDev => "other_dev",
            Category::SoMmap => "so_mmap",
            Category::JarMmap => "jar_mmap",
            Category::ApkMmap => "apk_mmap",
            Category::TtfMmap => "ttf_mmap",
            Category::DexMmap => "dex_mmap",
            Category::OatMmap => "oat_mmap",
            Category::ArtMmap => "art_mmap",
            Category::OtherMmap => "other_mmap",
            Category::GlMtrack => "gl_mtrack",
            Category::Unknown => "unknown_mem",
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn kb_to_mb(kb: f64) -> f64 {
    round2(kb / 1024.0)
}

/// Megabytes per category, 2-decimal precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategorySet {
    values: [f64; CATEGORY_COUNT],
}

impl CategorySet {
    pub fn get(&self, category: Category) -> f64 {
        self.values[category as usize]
    }

    pub fn set(&mut self, category: Category, mb: f64) {
        self.values[category as usize] = mb;
    }

    pub fn merge(&mut self, other: &CategorySet) {
        for category in Category::ALL {
            let idx = category as usize;
            self.values[idx] = round2(self.values[idx] + other.values[idx]);
        }
    }
}

/// Summary metrics in megabytes. `opss` is derived: TOTAL PSS minus Graphics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SummarySet {
    pub uss: f64,
    pub rss: f64,
    pub pss: f64,
    pub swap: f64,
    pub graphics: f64,
    pub opss: f64,
}

impl SummarySet {
    pub fn merge(&mut self, other: &SummarySet) {
        self.uss = round2(self.uss + other.uss);
        self.rss = round2(self.rss + other.rss);
        self.pss = round2(self.pss + other.pss);
        self.swap = round2(self.swap + other.swap);
        self.graphics = round2(self.graphics + other.graphics);
        self.opss = round2(self.opss + other.opss);
    }
}

/// Adjustment <= 0 means the kernel treats the process as foreground.
pub fn is_foreground(oom_adj: &str) -> bool {
    oom_adj
        .trim()
        .parse::<i32>()
        .map(|value| value <= 0)
        .unwrap_or(false)
}

/// Per-sample context recorded alongside the numeric fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Remark {
    pub taken_at: String,
    pub uid: String,
    pub oom_adj: String,
    pub activity: String,
    pub foreground: bool,
    pub process_label: String,
}

/// What the parser extracted from one pid's dump. Either half can be absent
/// when the dump was truncated (process died mid-read).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PidSnapshot {
    pub categories: Option<CategorySet>,
    pub summary: Option<SummarySet>,
    pub vm_size_mb: f64,
}

/// One fully merged, completeness-checked sample ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySnapshot {
    pub remark: Remark,
    pub categories: CategorySet,
    pub summary: SummarySet,
    pub vm_size_mb: f64,
}

/// Sums per-pid snapshots across a multi-process app. Merging a single
/// snapshot is the identity.
#[derive(Debug, Default)]
pub struct SnapshotAccumulator {
    categories: Option<CategorySet>,
    summary: Option<SummarySet>,
    vm_size_mb: f64,
}

impl SnapshotAccumulator {
    pub fn add(&mut self, snapshot: &PidSnapshot) {
        if let Some(categories) = &snapshot.categories {
            match &mut self.categories {
                Some(merged) => merged.merge(categories),
                None => self.categories = Some(*categories),
            }
        }
        if let Some(summary) = &snapshot.summary {
            match &mut self.summary {
                Some(merged) => merged.merge(summary),
                None => self.summary = Some(*summary),
            }
        }
        self.vm_size_mb = round2(self.vm_size_mb + snapshot.vm_size_mb);
    }

    /// None unless both the category breakdown and the summary survived the
    /// merge; a half-formed sample is discarded, never persisted.
    pub fn finish(self, remark: Remark) -> Option<MemorySnapshot> {
        let categories = self.categories?;
        let summary = self.summary?;
        Some(MemorySnapshot {
            remark,
            categories,
            summary,
            vm_size_mb: self.vm_size_mb,
        })
    }
}
