pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# TAILBEAT CONFIGURATION
# =============================================================================
# Tailbeat watches files matching glob patterns, reads new lines as they are
# appended, and ships them in batches to the configured output. Read positions
# are kept in the registry file so a restart resumes where it left off.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/tailbeat/config.yml
#   3. /etc/tailbeat/config.yml
#
# Environment variables can be referenced as $env{VAR_NAME}.

tailbeat:
  # ===========================================================================
  # PROSPECTORS
  # ===========================================================================
  # Each prospector scans its globs every scan_frequency and starts one
  # harvester per matching file.
  prospectors:
    - paths:
        - /var/log/*.log
        - /var/log/nginx/*.log
      input_type: log
      document_type: log
      # Static fields attached to every event
      fields:
        env: production
      # Put the fields at the top level of the event instead of under "fields"
      fields_under_root: false
      # Files not modified for this long are skipped when first seen
      ignore_older: 24h
      scan_frequency: 10s
      harvester_buffer_size: 16384
      # Start new files at their end instead of their beginning
      tail_files: false
      # Any WHATWG encoding label (utf-8, latin1, utf-16le, gbk, ...) or "plain"
      encoding: utf-8
      # Wait after EOF before checking again; grows by backoff_factor up to max_backoff
      backoff: 1s
      backoff_factor: 2
      max_backoff: 10s
      # How long to wait for a line terminator before shipping a partial line
      partial_line_waiting: 5s
      # Stop harvesting once the file is renamed or removed
      force_close_files: false

  # Events are shipped when spool_size is reached or after idle_timeout
  spool_size: 1024
  idle_timeout: 5s

  # Where read positions are persisted
  registry_file: /var/lib/tailbeat/registry

  # Optional directory of extra *.yml files contributing prospectors
  # config_dir: /etc/tailbeat/conf.d

# =============================================================================
# OUTPUT
# =============================================================================
# console: one JSON document per line on stdout
# file:    one JSON document per line appended to path
output:
  type: console
  # sync waits for the output to confirm each batch; fire_and_forget does not
  publish_mode: sync
"#
    .to_string()
}
