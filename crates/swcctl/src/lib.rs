pub mod cmd_attrs;
pub mod cmd_eeprom;
pub mod cmd_get;
pub mod cmd_links;
pub mod cmd_list;
pub mod cmd_probe;
pub mod cmd_set;
pub mod common;
