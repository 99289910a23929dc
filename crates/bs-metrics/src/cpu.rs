// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CPU statistics read from cgroup v1 files.
//!
//! Usage is cumulative CPU time in nanoseconds; the limit is expressed as a
//! percentage of one core (200.0 means two cores).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Locations of the cgroup files the collector reads.
#[derive(Debug, Clone)]
pub struct CgroupPaths {
    /// Total CPU time, in nanoseconds, consumed by all tasks in the cgroup
    pub cpu_usage: PathBuf,
    /// CPUs the tasks in the cgroup may run on, e.g. "0-2,16"
    pub cpuset_cpus: PathBuf,
    /// CFS scheduler period, in microseconds
    pub cfs_period: PathBuf,
    /// CFS scheduler quota per period, in microseconds (-1 when unlimited)
    pub cfs_quota: PathBuf,
}

impl Default for CgroupPaths {
    fn default() -> Self {
        Self {
            cpu_usage: PathBuf::from("/sys/fs/cgroup/cpu/cpuacct.usage"),
            cpuset_cpus: PathBuf::from("/sys/fs/cgroup/cpuset/cpuset.cpus"),
            cfs_period: PathBuf::from("/sys/fs/cgroup/cpu/cpu.cfs_period_us"),
            cfs_quota: PathBuf::from("/sys/fs/cgroup/cpu/cpu.cfs_quota_us"),
        }
    }
}

/// Raw cgroup values, normalized to nanoseconds
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct CgroupStats {
    pub total: Option<u64>,
    pub cpu_count: Option<u64>,
    pub scheduler_period: Option<u64>,
    pub scheduler_quota: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpuStats {
    /// Cumulative CPU usage in nanoseconds
    pub total: u64,
    /// CPU limit in percent of one core
    pub limit_pct: f64,
    /// Whether the limit fell back to the host CPU count
    pub defaulted_limit: bool,
}

pub fn read_cpu_stats(paths: &CgroupPaths) -> Option<CpuStats> {
    build_cpu_stats(&read_cgroup_stats(paths), num_cpus::get() as u64)
}

/// Reads the cumulative CPU usage, the only value the collector cannot do without.
pub fn read_cpu_usage(path: &Path) -> Option<u64> {
    fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse::<u64>().ok())
}

fn build_cpu_stats(cgroup_stats: &CgroupStats, host_cpu_count: u64) -> Option<CpuStats> {
    let total = cgroup_stats.total?;
    let limit = compute_cgroup_cpu_limit_pct(cgroup_stats, host_cpu_count);
    let (limit_pct, defaulted_limit) = match limit {
        Some(limit) => (limit, false),
        None => {
            debug!("METRICS | No CPU limit found, defaulting to host CPU count: {host_cpu_count}");
            (host_cpu_count as f64 * 100.0, true)
        }
    };

    Some(CpuStats {
        total,
        limit_pct,
        defaulted_limit,
    })
}

pub(crate) fn read_cgroup_stats(paths: &CgroupPaths) -> CgroupStats {
    let total = read_cpu_usage(&paths.cpu_usage);
    if total.is_none() {
        debug!("METRICS | Could not read CPU usage from {}", paths.cpu_usage.display());
    }

    let cpu_count = read_cpu_count_from_file(&paths.cpuset_cpus).ok();

    let scheduler_period = fs::read_to_string(&paths.cfs_period)
        .ok()
        .and_then(|contents| contents.trim().parse::<u64>().ok())
        .and_then(|us| us.checked_mul(1000));

    let scheduler_quota = fs::read_to_string(&paths.cfs_quota)
        .ok()
        .and_then(|contents| contents.trim().parse::<i64>().ok())
        // -1 means no quota
        .and_then(|us| u64::try_from(us).ok())
        .and_then(|us| us.checked_mul(1000));

    CgroupStats {
        total,
        cpu_count,
        scheduler_period,
        scheduler_quota,
    }
}

/// Counts the CPUs listed in a cpuset file: "0-2,16" is 4 CPUs.
pub(crate) fn read_cpu_count_from_file(path: &Path) -> Result<u64, io::Error> {
    let contents = fs::read_to_string(path)?;
    parse_cpuset(contents.trim())
}

fn parse_cpuset(cpuset: &str) -> Result<u64, io::Error> {
    if cpuset.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty cpuset"));
    }

    let parse = |value: &str| {
        value.trim().parse::<u64>().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to parse CPU id {value:?}: {e}"),
            )
        })
    };

    let mut cpu_count = 0;
    for part in cpuset.split(',') {
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse(start)?, parse(end)?);
                if end < start {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Invalid CPU range {part:?}"),
                    ));
                }
                cpu_count += (end - start).saturating_add(1);
            }
            None => {
                parse(part)?;
                cpu_count += 1;
            }
        }
    }
    Ok(cpu_count)
}

/// Limit is min(cpuset, CFS quota); a cpuset spanning every host CPU is no limit.
fn compute_cgroup_cpu_limit_pct(cgroup_stats: &CgroupStats, host_cpu_count: u64) -> Option<f64> {
    let cpuset_limit = cgroup_stats
        .cpu_count
        .filter(|count| *count != host_cpu_count)
        .map(|count| count as f64 * 100.0);

    let quota_limit = match (cgroup_stats.scheduler_quota, cgroup_stats.scheduler_period) {
        (Some(quota), Some(period)) if period > 0 => Some(100.0 * quota as f64 / period as f64),
        _ => None,
    };

    match (cpuset_limit, quota_limit) {
        (Some(cpuset), Some(quota)) => Some(cpuset.min(quota)),
        (cpuset, quota) => cpuset.or(quota),
    }
}
