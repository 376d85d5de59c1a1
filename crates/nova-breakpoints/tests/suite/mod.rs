mod construction;
mod lifecycle;
mod teardown;
