//! ANSI welcome banner shown once per new connection.

const BANNER: &str = concat!(
    "\x1b[95m██████╗ \x1b[96m██████╗ \x1b[94m███████╗\x1b[0m\n",
    "\x1b[95m██╔══██╗\x1b[96m██╔══██╗\x1b[94m██╔════╝\x1b[0m\n",
    "\x1b[95m██████╔╝\x1b[96m██████╔╝\x1b[94m███████╗\x1b[0m\n",
    "\x1b[95m██╔══██╗\x1b[96m██╔══██╗\x1b[94m╚════██║\x1b[0m\n",
    "\x1b[95m██████╔╝\x1b[96m██████╔╝\x1b[94m███████║\x1b[0m\n",
    "\x1b[95m╚═════╝ \x1b[96m╚═════╝ \x1b[94m╚══════╝\x1b[0m\n",
    "\x1b[94m═════════════════════════════════════════════════\x1b[0m\n",
    "\x1b[95m» \x1b[96mWELCOME TO THE \x1b[92mBBS\x1b[95m :: \x1b[94mREAL-TIME TERMINAL NODE\x1b[0m\n",
    "\x1b[94m═════════════════════════════════════════════════\x1b[0m\n",
    "\x1b[95mCommands:\x1b[96m /register <user> <pass> \x1b[94m/login <user> <pass> \x1b[92m/logout \x1b[95m/nick <name>\x1b[0m\n",
    "\x1b[95m          \x1b[96m/who \x1b[94m/msg <user> <text> \x1b[92m/forum \x1b[95m/forum post <text>\x1b[0m\n",
    "\x1b[95m          \x1b[96m/avatar <file> \x1b[94m/clear \x1b[92m/quit \x1b[95m/help\x1b[0m",
);

/// Static welcome block; no per-connection state.
pub fn render() -> &'static str {
    BANNER
}
