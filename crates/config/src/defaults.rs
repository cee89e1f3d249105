pub fn default_service_name() -> String {
    "ridepool".to_string()
}

pub fn default_max_distance_km() -> f64 {
    5.0
}

pub fn default_max_passengers() -> u32 {
    1
}

pub fn default_max_passengers_limit() -> u32 {
    6
}

pub fn default_candidate_pool_size() -> usize {
    3
}

pub fn default_approval_timeout_secs() -> Option<u64> {
    Some(90)
}

pub fn default_route_provider() -> super::RouteProviderKind {
    super::RouteProviderKind::StraightLine
}

pub fn default_densify_step_km() -> f64 {
    0.25
}

pub fn default_route_timeout_secs() -> u64 {
    5
}

pub fn default_send_timeout_ms() -> u64 {
    2000
}

pub fn default_channel_capacity() -> usize {
    64
}

pub fn default_log_format() -> super::LogFormatKind {
    super::LogFormatKind::Pretty
}

pub fn default_metrics_port() -> u16 {
    9100
}
