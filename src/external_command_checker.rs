use bird_tool_utils::external_command_checker::*;

pub fn check_for_mash() {
    self::check_for_external_command_presence("mash", "which mash");
    self::default_version_check("mash", "2.2", false, None);
}

pub fn check_for_nucmer() {
    self::check_for_external_command_presence("nucmer", "which nucmer");
    // MUMmer 3's nucmer has no clean version flag, so a failed version
    // query is tolerated.
    self::default_version_check("nucmer", "3.1", true, None);
}
