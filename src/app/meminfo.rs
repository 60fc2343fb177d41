use regex::Regex;

use crate::app::snapshot::{kb_to_mb, round2, Category, CategorySet, SummarySet};

const BREAKDOWN_MARKER: &str = "** MEMINFO";
const SUMMARY_MARKER: &str = "App Summary";

/// Whether a numeric field came from the dump or fell back to the 0.00
/// default. External consumers only ever see the value; the distinction
/// exists so the fallback policy itself is testable.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Parsed(f64),
    Defaulted,
}

impl Field {
    fn mb(self) -> f64 {
        match self {
            Field::Parsed(value) => value,
            Field::Defaulted => 0.0,
        }
    }
}

/// Result of parsing one `dumpsys meminfo` dump. Either half is absent when
/// its section marker never appeared, which is how a process dying mid-read
/// shows up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeminfoReport {
    pub categories: Option<CategorySet>,
    pub summary: Option<SummarySet>,
}

/// First integer following `label` on the same line, converted kB -> MB.
/// Absent or non-numeric yields the zero default, never an error. If a
/// vendor dump repeats a label, the first occurrence wins.
fn field_kb(region: &str, label: &str) -> Field {
    let pattern = format!(r"{}[^\d\n]*(\d+)", regex::escape(label));
    let Ok(re) = Regex::new(&pattern) else {
        return Field::Defaulted;
    };
    match re
        .captures(region)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        Some(kb) => Field::Parsed(kb_to_mb(kb)),
        None => Field::Defaulted,
    }
}

/// The category-breakdown region: from the meminfo banner through its
/// terminal `TOTAL` line. None when the banner is missing entirely.
fn breakdown_region(raw: &str) -> Option<String> {
    let start = raw.find(BREAKDOWN_MARKER)?;
    let mut region = String::new();
    for line in raw[start..].lines() {
        region.push_str(line);
        region.push('\n');
        let mut tokens = line.split_whitespace();
        if tokens.next() == Some("TOTAL") && tokens.next().is_some_and(is_numeric) {
            break;
        }
    }
    Some(region)
}

/// The `App Summary` region through its `TOTAL SWAP` line (or to the end of
/// the dump when that line is missing; fields then default individually).
fn summary_region(raw: &str) -> Option<String> {
    let start = raw.find(SUMMARY_MARKER)?;
    let mut region = String::new();
    for line in raw[start..].lines() {
        region.push_str(line);
        region.push('\n');
        if line.contains("TOTAL SWAP") {
            break;
        }
    }
    Some(region)
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

/// Total memory (USS) comes off the breakdown region's terminal `TOTAL`
/// line, not the App Summary.
fn total_uss(breakdown: &str) -> Field {
    let terminal = breakdown
        .lines()
        .find(|line| line.split_whitespace().next() == Some("TOTAL"));
    match terminal {
        Some(line) => field_kb(line, "TOTAL"),
        None => Field::Defaulted,
    }
}

pub fn parse_memory_dump(raw: &str) -> MeminfoReport {
    let breakdown = breakdown_region(raw);

    let categories = breakdown.as_deref().map(|region| {
        let mut set = CategorySet::default();
        for category in Category::ALL {
            set.set(category, field_kb(region, category.label()).mb());
        }
        set
    });

    let uss = breakdown
        .as_deref()
        .map(total_uss)
        .unwrap_or(Field::Defaulted);

    let summary = summary_region(raw).map(|region| {
        let rss = field_kb(&region, "TOTAL RSS").mb();
        let pss = field_kb(&region, "TOTAL PSS").mb();
        let swap = field_kb(&region, "TOTAL SWAP").mb();
        let graphics = field_kb(&region, "Graphics").mb();
        SummarySet {
            uss: uss.mb(),
            rss,
            pss,
            swap,
            graphics,
            // Zero-defaulted operands flow straight through the subtraction.
            opss: round2(pss - graphics),
        }
    });

    MeminfoReport {
        categories,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dump() -> String {
        "\
Applications Memory Usage (in Kilobytes):
Uptime: 123456 Realtime: 654321

** MEMINFO in pid 4321 [com.example.app] **
                   Pss  Private  Private  SwapPss      Rss     Heap     Heap     Heap
                 Total    Dirty    Clean    Dirty    Total     Size    Alloc     Free
                ------   ------   ------   ------   ------   ------   ------   ------
  Native Heap    10234    10200        0        0    10234    20480    15360     5120
  Dalvik Heap     2048     2000       48        0     2048     4096     3072     1024
 Dalvik Other      512      512        0        0      512
        Stack      256      256        0        0      256
       Ashmem       12        0        0        0       12
    Other dev       34        0       24        0       34
     .so mmap     1536      120      900        0     1536
    .jar mmap      768        0      640        0      768
    .apk mmap      896        0      720        0      896
    .ttf mmap      128        0      100        0      128
    .dex mmap     1024        8      980        0     1024
    .oat mmap      512        0      400        0      512
    .art mmap      640      560       16        0      640
   Other mmap       96       12        8        0       96
    GL mtrack     2048        0        0        0     2048
      Unknown      384      380        0        0      384
        TOTAL    51200    44800     6400        0    51200    24576    18432     6144

 App Summary
                       Pss(KB)                        Rss(KB)
                        ------                         ------
           Java Heap:     2688
         Native Heap:    10200
                Code:     3768
               Stack:      256
            Graphics:     2048
       Private Other:      800
              System:     1200
             Unknown:

           TOTAL PSS:    40960            TOTAL RSS:    51200       TOTAL SWAP PSS:        0

 Objects
               Views:       42         ViewRootImpl:        1
"
        .to_string()
    }

    #[test]
    fn parses_category_breakdown_in_megabytes() {
        let report = parse_memory_dump(&sample_dump());
        let categories = report.categories.expect("categories");
        assert_eq!(categories.get(Category::NativeHeap), 9.99);
        assert_eq!(categories.get(Category::DalvikHeap), 2.0);
        assert_eq!(categories.get(Category::GlMtrack), 2.0);
        assert_eq!(categories.get(Category::Unknown), 0.38);
    }

    #[test]
    fn parses_summary_and_derives_opss() {
        let report = parse_memory_dump(&sample_dump());
        let summary = report.summary.expect("summary");
        assert_eq!(summary.uss, 50.0);
        assert_eq!(summary.rss, 50.0);
        assert_eq!(summary.pss, 40.0);
        assert_eq!(summary.swap, 0.0);
        assert_eq!(summary.graphics, 2.0);
        assert_eq!(summary.opss, 38.0);
    }

    #[test]
    fn missing_breakdown_marker_yields_no_categories() {
        let raw = "No process found for: 4321\n";
        let report = parse_memory_dump(raw);
        assert!(report.categories.is_none());
        assert!(report.summary.is_none());
    }

    #[test]
    fn summary_without_breakdown_gets_zero_uss() {
        let raw = "\
 App Summary
            Graphics:     1024
           TOTAL PSS:    20480            TOTAL SWAP PSS:        0
";
        let report = parse_memory_dump(raw);
        assert!(report.categories.is_none());
        let summary = report.summary.expect("summary");
        assert_eq!(summary.uss, 0.0);
        assert_eq!(summary.pss, 20.0);
        assert_eq!(summary.opss, 19.0);
    }

    #[test]
    fn absent_category_defaults_to_zero() {
        let raw = "\
** MEMINFO in pid 9 [com.example.app] **
  Native Heap    1024
        TOTAL    2048 0 0 0 0
";
        let report = parse_memory_dump(raw);
        let categories = report.categories.expect("categories");
        assert_eq!(categories.get(Category::NativeHeap), 1.0);
        assert_eq!(categories.get(Category::DalvikHeap), 0.0);
        assert_eq!(categories.get(Category::ArtMmap), 0.0);
    }

    #[test]
    fn non_numeric_field_defaults_to_zero() {
        assert_eq!(field_kb("Graphics: n/a\n", "Graphics"), Field::Defaulted);
        assert_eq!(field_kb("", "Graphics"), Field::Defaulted);
        assert_eq!(field_kb("Graphics: 1024\n", "Graphics").mb(), 1.0);
    }

    #[test]
    fn repeated_label_takes_first_occurrence() {
        let raw = "\
** MEMINFO in pid 9 [com.example.app] **
  Native Heap    1024
  Native Heap    9999
        TOTAL    1024 0 0 0 0
";
        let report = parse_memory_dump(raw);
        let categories = report.categories.expect("categories");
        assert_eq!(categories.get(Category::NativeHeap), 1.0);
    }

    #[test]
    fn swap_label_tolerates_pss_suffix() {
        let raw = "\
 App Summary
           TOTAL PSS:    10240            TOTAL SWAP PSS:      512
";
        let summary = parse_memory_dump(raw).summary.expect("summary");
        assert_eq!(summary.swap, 0.5);
    }

    #[test]
    fn uss_reads_terminal_total_line_only() {
        let dump = sample_dump();
        let region = breakdown_region(&dump).expect("region");
        assert_eq!(total_uss(&region).mb(), 50.0);
        // The TOTAL PSS line of the App Summary must not be consulted.
        assert!(!region.contains("App Summary"));
    }
}
