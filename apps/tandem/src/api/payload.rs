//! # Payload Parsing
//!
//! Eye batches arrive as newline-delimited records of seven numbers:
//! timestamp, three origin and three direction components, separated by
//! `,` or `;`. Malformed lines are skipped and counted, never fatal.

use std::fmt::Write as _;

/// CSV header of persisted eye batches.
pub const EYE_CSV_HEADER: &str = "utc_ms,t,ox,oy,oz,dx,dy,dz,server_recv_utc_ms,session";

const EYE_FIELDS: usize = 7;

/// One gaze sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeRecord {
    pub t: f64,
    pub origin: [f64; 3],
    pub direction: [f64; 3],
}

impl EyeRecord {
    /// Parse one line; `None` for blank or malformed input.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let mut nums = [0.0f64; EYE_FIELDS];
        let mut count = 0;
        for part in line.split([',', ';']) {
            if count == EYE_FIELDS {
                return None;
            }
            nums[count] = part.trim().parse::<f64>().ok()?;
            count += 1;
        }
        (count == EYE_FIELDS).then(|| Self {
            t: nums[0],
            origin: [nums[1], nums[2], nums[3]],
            direction: [nums[4], nums[5], nums[6]],
        })
    }
}

/// Parsed batch with its skip count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EyeBatch {
    pub records: Vec<EyeRecord>,
    pub ng: usize,
}

impl EyeBatch {
    /// Parse a whole body. Every line that is not a valid record counts as `ng`.
    #[must_use]
    pub fn parse(body: &str) -> Self {
        let mut batch = Self::default();
        for line in body.lines() {
            match EyeRecord::parse(line) {
                Some(r) => batch.records.push(r),
                None => batch.ng += 1,
            }
        }
        batch
    }

    /// Number of valid records.
    #[must_use]
    pub fn ok(&self) -> usize {
        self.records.len()
    }

    /// Render the CSV body, header included.
    #[must_use]
    pub fn to_csv(&self, capture_start_ms: Option<i64>, server_recv_ms: i64, session: &str) -> String {
        let mut out = String::with_capacity(64 * (self.records.len() + 1));
        out.push_str(EYE_CSV_HEADER);
        out.push('\n');
        let first_t = self.records.first().map(|r| r.t).unwrap_or_default();
        for r in &self.records {
            let utc = estimate_utc_ms(r.t, capture_start_ms, first_t)
                .map(|ms| ms.to_string())
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "{},{},{},{},{},{},{},{},{},{}",
                utc,
                r.t,
                r.origin[0],
                r.origin[1],
                r.origin[2],
                r.direction[0],
                r.direction[1],
                r.direction[2],
                server_recv_ms,
                session
            );
        }
        out
    }
}

/// Best-effort epoch milliseconds for a device timestamp.
///
/// - `t >= 1e12`: already epoch milliseconds
/// - `t >= 1e9`: epoch seconds
/// - otherwise relative seconds, anchored at the capture start when known
#[must_use]
pub fn estimate_utc_ms(t: f64, capture_start_ms: Option<i64>, first_t: f64) -> Option<i64> {
    if t >= 1e12 {
        return Some(t as i64);
    }
    if t >= 1e9 {
        return Some((t * 1000.0) as i64);
    }
    capture_start_ms.map(|start| start + ((t - first_t) * 1000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_separators() {
        let a = EyeRecord::parse("1.5,0,0,0,0,0,1").expect("comma");
        let b = EyeRecord::parse(" 1.5; 0;0;0 ;0;0;1 ").expect("semicolon");
        assert_eq!(a, b);
        assert_eq!(a.direction, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn rejects_wrong_field_count_or_garbage() {
        assert!(EyeRecord::parse("1,2,3,4,5,6").is_none());
        assert!(EyeRecord::parse("1,2,3,4,5,6,7,8").is_none());
        assert!(EyeRecord::parse("1,2,x,4,5,6,7").is_none());
        assert!(EyeRecord::parse("   ").is_none());
    }

    #[test]
    fn batch_counts_ok_and_ng() {
        let body = "0,0,0,0,0,0,1\nbad\n0.1,0,0,0,0,0,1\n\n0.2;0;0;0;0;0;1";
        let batch = EyeBatch::parse(body);
        assert_eq!(batch.ok(), 3);
        assert_eq!(batch.ng, 2);
    }

    #[test]
    fn utc_estimation_rules() {
        assert_eq!(estimate_utc_ms(1_700_000_000_123.0, None, 0.0), Some(1_700_000_000_123));
        assert_eq!(estimate_utc_ms(1_700_000_000.5, None, 0.0), Some(1_700_000_000_500));
        assert_eq!(estimate_utc_ms(12.25, Some(5_000), 12.0), Some(5_250));
        assert_eq!(estimate_utc_ms(12.25, None, 12.0), None);
    }

    #[test]
    fn csv_rows_leave_unknown_utc_blank() {
        let batch = EyeBatch::parse("2,0.5,0,0,0,0,1");
        let csv = batch.to_csv(None, 9_000, "no_1");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], EYE_CSV_HEADER);
        assert_eq!(lines[1], ",2,0.5,0,0,0,0,1,9000,no_1");
    }
}
