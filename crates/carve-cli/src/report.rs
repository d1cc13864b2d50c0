//! Human-readable rendering of the run summary (non-canonical; the
//! JSONL summary is the wire format).

use carve_engine::{DedupTotals, StatSummary};

/// Insert thousands separators: `1234567` → `"1,234,567"`.
pub fn commify(value: i64) -> String {
    let negative = value < 0;
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if negative { format!("-{out}") } else { out }
}

/// Render the stats-text report.
pub fn render_stats_text(
    summary: &StatSummary,
    totals: &DedupTotals,
    collector_is_none: bool,
    multipart: bool,
) -> String {
    let mut out = String::with_capacity(1024);

    let elapsed_secs = summary.sys.elapsed_nsecs.max(1) as f64 / 1_000_000_000.0;
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let substreams_desc = if multipart {
        format!(" from {} substreams", commify(summary.streams as i64))
    } else {
        String::new()
    };

    out.push_str(&format!(
        "\nRan on {} logical CPU threads\
         \nProcessing took {:.2} seconds using {:.2} vCPU and {:.2} MiB peak memory\
         \nPerforming {} system reads using {:.2} vCPU at about {:.2} MiB/s\
         \nIngesting payload of:{:>17} bytes{}\n\n",
        threads,
        elapsed_secs,
        summary.sys.cpu_user_nsecs as f64 / summary.sys.elapsed_nsecs.max(1) as f64,
        summary.sys.max_rss_bytes as f64 / (1024.0 * 1024.0),
        commify(summary.sys.read_calls as i64),
        summary.sys.cpu_sys_nsecs as f64 / summary.sys.elapsed_nsecs.max(1) as f64,
        (summary.dag.payload as f64 / (1024.0 * 1024.0)) / elapsed_secs,
        commify(summary.dag.payload),
        substreams_desc,
    ));

    if summary.dag.nodes > 0 {
        out.push_str(&format!(
            "Forming DAG covering:{:>17} bytes of {} logical nodes\n",
            commify(summary.dag.wire_size),
            commify(summary.dag.nodes),
        ));
    }

    if summary.dag.payload > 0 && totals.unique_bytes > 0 {
        out.push_str(&format!(
            "\nDataset deduped into:{:>17} bytes over {} unique leaf nodes\n",
            commify(totals.unique_leaf_bytes),
            commify(totals.unique_leaf_blocks),
        ));
        if !collector_is_none {
            out.push_str(&format!(
                "Linked as streams by:{:>17} bytes over {} unique DAG-PB nodes\nTaking a grand-total:{:>17} bytes, ",
                commify(totals.unique_bytes - totals.unique_leaf_bytes),
                commify(totals.unique_blocks - totals.unique_leaf_blocks),
                commify(totals.unique_bytes),
            ));
        } else {
            out.push_str(&" ".repeat(44));
        }
        out.push_str(&format!(
            "{:.2}% of original, {:.1}x smaller\n\n",
            100.0 * totals.unique_bytes as f64 / summary.dag.payload as f64,
            summary.dag.payload as f64 / totals.unique_bytes as f64,
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_engine::{DagStats, SysStats};

    fn summary() -> StatSummary {
        StatSummary {
            event_type: "summary",
            dag: DagStats {
                nodes: 5,
                wire_size: 1_048_703,
                payload: 1_048_577,
            },
            streams: 3,
            roots: vec![],
            sys: SysStats {
                read_calls: 17,
                elapsed_nsecs: 2_000_000_000,
                ..SysStats::default()
            },
        }
    }

    #[test]
    fn test_commify() {
        assert_eq!(commify(0), "0");
        assert_eq!(commify(999), "999");
        assert_eq!(commify(1000), "1,000");
        assert_eq!(commify(1_048_577), "1,048,577");
        assert_eq!(commify(-1234), "-1,234");
    }

    #[test]
    fn test_report_mentions_key_figures() {
        let totals = DedupTotals {
            unique_blocks: 3,
            unique_bytes: 1_048_703,
            unique_leaf_blocks: 2,
            unique_leaf_bytes: 1_048_599,
        };
        let text = render_stats_text(&summary(), &totals, false, true);
        assert!(text.contains("Ingesting payload of:"));
        assert!(text.contains("1,048,577"));
        assert!(text.contains("from 3 substreams"));
        assert!(text.contains("unique DAG-PB nodes"));
        assert!(text.contains("% of original"));
    }

    #[test]
    fn test_report_none_collector_skips_link_section() {
        let totals = DedupTotals {
            unique_blocks: 2,
            unique_bytes: 100,
            unique_leaf_blocks: 2,
            unique_leaf_bytes: 100,
        };
        let text = render_stats_text(&summary(), &totals, true, false);
        assert!(!text.contains("DAG-PB"));
        assert!(!text.contains("substreams"));
    }

    #[test]
    fn test_report_empty_run_has_no_dedup_section() {
        let empty = StatSummary {
            dag: DagStats::default(),
            ..summary()
        };
        let text = render_stats_text(&empty, &DedupTotals::default(), false, false);
        assert!(!text.contains("deduped"));
    }
}
