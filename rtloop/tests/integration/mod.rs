mod app_lifecycle;
mod cyclic_timing;
mod trace_session;
