//! Shared constants for end-to-end tests
//!
//! The test server runs the demo data set and stands in `sh` for the Python
//! interpreter, so the "scrapers" below are small shell scripts.

// ============================================================================
// Fake Scraper Scripts
// ============================================================================

/// GMB scraper that keeps running until it is stopped.
pub const LONG_RUNNING_SCRIPT: &str = r#"echo "gmb scraper starting: $*"
i=0
while [ $i -lt 600 ]; do
    echo "tick $i"
    i=$((i + 1))
    sleep 0.1
done
"#;

/// Email scraper that finishes on its own.
pub const QUICK_SCRIPT: &str = r#"echo "email scraper starting: $*"
echo "checked 3 sites"
"#;

/// Postcode scraper that fails straight away.
pub const FAILING_SCRIPT: &str = r#"echo "postcode scraper starting: $*"
echo "could not reach postcode service" >&2
exit 3
"#;

// ============================================================================
// Demo Data Facts
// ============================================================================

/// Subsector used to start the GMB scraper.
pub const GMB_SUBSECTOR: &str = "LS1 1";

/// Businesses in the demo `restaurants` collection.
pub const DEMO_BUSINESS_COUNT: u64 = 34;

/// Demo businesses with at least one email address.
pub const DEMO_EMAIL_BUSINESS_COUNT: u64 = 14;

/// Entries in the demo subsector queue.
pub const DEMO_SUBSECTOR_COUNT: u64 = 6;

/// Completed entries in the demo subsector queue.
pub const DEMO_COMPLETED_SUBSECTORS: u64 = 3;

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Per-request timeout of the test client (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Interval between readiness checks (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Maximum time to wait for a scraper state change (milliseconds)
pub const JOB_STATE_TIMEOUT_MS: u64 = 5000;
