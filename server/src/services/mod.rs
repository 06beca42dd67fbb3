pub mod land_poller;
