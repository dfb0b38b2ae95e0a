//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the physics/fitting code stays clean and testable
//! - output changes are localized

use crate::domain::{
    CampaignResult, ModeParams, Moments, PhysicalProperties, PipelineConfig, SnapshotResult, SnapshotStatus,
};

/// Format the campaign summary (settings, status counts, mean modes and content).
pub fn format_campaign_summary(
    campaign: &CampaignResult,
    config: &PipelineConfig,
    props: &PhysicalProperties,
    truth: Option<&[ModeParams]>,
) -> String {
    let mut out = String::new();

    out.push_str("=== psd - SMPS/APS merge & log-normal fit ===\n");
    out.push_str(&format!(
        "Particles: density={:.2} g/cm3 | shape factor={:.2} | gas: T={:.2} K, P={:.2} hPa\n",
        props.density, props.shape_factor, props.temperature_k, props.pressure_hpa
    ));
    out.push_str(&format!(
        "Merge: {:?} | overlap={} | gaps={} | smoothing={}\n",
        config.merge_rule,
        config
            .overlap_bounds
            .map(|(lo, hi)| format!("[{lo:.3}, {hi:.3}] um"))
            .unwrap_or_else(|| "auto".to_string()),
        if config.interpolate_gaps { "interpolated" } else { "empty" },
        fmt_ranges(&config.smoothing_ranges),
    ));
    out.push_str(&format!("Fit: modes={:?} | max iterations={}\n", config.mode_count, config.fit.max_iterations));

    out.push_str(&format!("\nSnapshots: n={}\n", campaign.snapshots.len()));
    for status in SnapshotStatus::ALL {
        out.push_str(&format!("  {:<20} {}\n", status.label(), campaign.count(status)));
    }
    let fallbacks = campaign
        .snapshots
        .iter()
        .filter(|s| s.fit.as_ref().is_some_and(|f| f.fallback_used))
        .count();
    if fallbacks > 0 {
        out.push_str(&format!("  (auto-guess fallbacks: {fallbacks})\n"));
    }

    let ok: Vec<&SnapshotResult> = campaign
        .snapshots
        .iter()
        .filter(|s| s.status == SnapshotStatus::Ok)
        .collect();

    if let Some(modes) = mean_modes(&ok) {
        out.push_str("\nMean fitted modes (ok snapshots):\n");
        out.push_str(&format_modes(&modes));
    }
    if let Some(truth) = truth {
        out.push_str("\nGenerating modes:\n");
        out.push_str(&format_modes(truth));
    }

    if let Some(m) = mean_moments(&ok) {
        out.push_str("\nMean content (ok snapshots):\n");
        out.push_str(&format!("- number : {:.1} cm-3\n", m.number));
        out.push_str(&format!("- surface: {:.2} um2 cm-3\n", m.surface));
        out.push_str(&format!("- volume : {:.3} um3 cm-3\n", m.volume));
        out.push_str(&format!("- mass   : {:.3} ug m-3\n", m.mass));
    }

    out
}

/// One row per snapshot.
pub fn format_snapshot_table(campaign: &CampaignResult) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<19} {:<20} {:>5} {:>10} {:>5} {:<40}",
            "timestamp", "status", "modes", "rmse", "iters", "note"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<19} {:-<20} {:-<5} {:-<10} {:-<5} {:-<40}", "", "", "", "", "", "").trim_end());
    out.push('\n');

    for s in &campaign.snapshots {
        let (modes, rmse, iters) = match &s.fit {
            Some(f) => (f.modes.len().to_string(), format!("{:.3}", f.rmse), f.iterations.to_string()),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };
        out.push_str(
            format!(
                "{:<19} {:<20} {:>5} {:>10} {:>5} {:<40}",
                s.timestamp.format("%Y-%m-%d %H:%M:%S"),
                s.status.label(),
                modes,
                rmse,
                iters,
                truncate(s.message.as_deref().unwrap_or(""), 40),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

fn format_modes(modes: &[ModeParams]) -> String {
    modes
        .iter()
        .enumerate()
        .map(|(i, m)| format!("- mode {}: N={:.1} cm-3 GMD={:.4} um GSD={:.3}\n", i + 1, m.total, m.gmd, m.gsd))
        .collect()
}

/// Per-mode means over snapshots whose fit has the most common mode count.
fn mean_modes(results: &[&SnapshotResult]) -> Option<Vec<ModeParams>> {
    let fits: Vec<&Vec<ModeParams>> = results.iter().filter_map(|s| s.fit.as_ref().map(|f| &f.modes)).collect();
    let count = (1..=2).max_by_key(|k| fits.iter().filter(|m| m.len() == *k).count())?;
    let same: Vec<&&Vec<ModeParams>> = fits.iter().filter(|m| m.len() == count).collect();
    if same.is_empty() {
        return None;
    }

    let n = same.len() as f64;
    Some(
        (0..count)
            .map(|i| {
                // Geometric means for the size parameters.
                let total = same.iter().map(|m| m[i].total).sum::<f64>() / n;
                let gmd = (same.iter().map(|m| m[i].gmd.ln()).sum::<f64>() / n).exp();
                let gsd = (same.iter().map(|m| m[i].gsd.ln()).sum::<f64>() / n).exp();
                ModeParams::new(total, gmd, gsd)
            })
            .collect(),
    )
}

fn mean_moments(results: &[&SnapshotResult]) -> Option<Moments> {
    let all: Vec<&Moments> = results.iter().filter_map(|s| s.moments.as_ref()).collect();
    if all.is_empty() {
        return None;
    }
    let n = all.len() as f64;
    Some(Moments {
        number: all.iter().map(|m| m.number).sum::<f64>() / n,
        surface: all.iter().map(|m| m.surface).sum::<f64>() / n,
        volume: all.iter().map(|m| m.volume).sum::<f64>() / n,
        mass: all.iter().map(|m| m.mass).sum::<f64>() / n,
    })
}

fn fmt_ranges(ranges: &[(f64, f64)]) -> String {
    if ranges.is_empty() {
        return "off".to_string();
    }
    let parts: Vec<String> = ranges.iter().map(|(lo, hi)| format!("[{lo:.3}, {hi:.3}]")).collect();
    parts.join(", ")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitResult, GuessSource};
    use chrono::NaiveDate;

    fn result(status: SnapshotStatus, modes: Vec<ModeParams>) -> SnapshotResult {
        let timestamp = NaiveDate::from_ymd_opt(2021, 4, 28)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let fit = (!modes.is_empty()).then(|| FitResult {
            modes,
            sse: 1.0,
            rmse: 0.1,
            bic: 0.0,
            n_points: 50,
            iterations: 12,
            converged: status == SnapshotStatus::Ok,
            guess_source: GuessSource::Auto,
            fallback_used: false,
        });
        SnapshotResult {
            timestamp,
            status,
            merged: None,
            fit,
            moments: None,
            message: (status != SnapshotStatus::Ok).then(|| "Empty size distribution from APS".to_string()),
        }
    }

    #[test]
    fn summary_counts_statuses_and_averages_modes() {
        let campaign = CampaignResult {
            snapshots: vec![
                result(SnapshotStatus::Ok, vec![ModeParams::new(100.0, 0.1, 1.5)]),
                result(SnapshotStatus::Ok, vec![ModeParams::new(300.0, 0.4, 1.5)]),
                result(SnapshotStatus::MergeError, vec![]),
            ],
        };
        let text = format_campaign_summary(&campaign, &PipelineConfig::default(), &PhysicalProperties::default(), None);
        assert!(text.contains(&format!("  {:<20} 1\n", "merge-error")));
        assert!(text.contains(&format!("  {:<20} 2\n", "ok")));
        // Geometric mean of 0.1 and 0.4 is 0.2.
        assert!(text.contains("N=200.0 cm-3 GMD=0.2000 um"));
    }

    #[test]
    fn table_has_one_row_per_snapshot() {
        let campaign = CampaignResult {
            snapshots: vec![
                result(SnapshotStatus::Ok, vec![ModeParams::new(100.0, 0.1, 1.5)]),
                result(SnapshotStatus::MergeError, vec![]),
            ],
        };
        let table = format_snapshot_table(&campaign);
        assert_eq!(table.lines().count(), 4);
        assert!(table.contains("merge-error"));
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
