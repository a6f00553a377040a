/// Declares the static global `CARD_DRIVER` cell protected by a
/// `critical_section` mutex.
///
/// Takes the six concrete hardware types of the driver: I/O pin, trigger
/// pin, bit clock, sample clock, edge detector and RNG.
///
/// # Example
/// ```rust,ignore
/// init_card_driver!(IoPin, TriggerPin, BitTimer, SampleTimer, PinChange, Trng);
/// ```
#[macro_export]
macro_rules! init_card_driver {
    ( $io:ty, $trg:ty, $bclk:ty, $sclk:ty, $edge:ty, $rng:ty ) => {
        pub static CARD_DRIVER: $crate::timer::GlobalCard<$io, $trg, $bclk, $sclk, $edge, $rng> =
            $crate::timer::global_card_init::<$io, $trg, $bclk, $sclk, $edge, $rng>();
    };
}

/// Constructs the card driver inside the `CARD_DRIVER` cell declared by
/// [`init_card_driver!`]. Call once from `main` before enabling
/// interrupts.
///
/// Arguments: I/O pin, optional trigger pin, bit clock, sample clock,
/// edge detector, RNG, provisioned key (`&[u8; 16]`), and a
/// [`CardConfig`](crate::timer::CardConfig).
///
/// # Example
/// ```rust,ignore
/// setup_card_driver!(io, Some(trigger), bclk, sclk, edge, trng, &KEY, CardConfig::default());
/// ```
#[macro_export]
macro_rules! setup_card_driver {
    ( $io:expr, $trg:expr, $bclk:expr, $sclk:expr, $edge:expr, $rng:expr, $key:expr, $config:expr ) => {
        $crate::timer::global_card_setup(
            &CARD_DRIVER,
            $io,
            $trg,
            $bclk,
            $sclk,
            $edge,
            $rng,
            $key,
            $config,
        );
    };
}

/// Bit-clock compare ISR body: latches the next transmit level.
///
/// # Example
/// ```rust,ignore
/// #[interrupt]
/// fn TIMER0_COMPA() {
///     etu_tick_card!();
/// }
/// ```
#[macro_export]
macro_rules! etu_tick_card {
    () => {
        $crate::timer::global_card_etu_tick(&CARD_DRIVER);
    };
}

/// Sample-clock compare ISR body: reads one bit of the incoming
/// character.
///
/// # Example
/// ```rust,ignore
/// #[interrupt]
/// fn TIMER2_COMPA() {
///     sample_tick_card!();
/// }
/// ```
#[macro_export]
macro_rules! sample_tick_card {
    () => {
        $crate::timer::global_card_sample_tick(&CARD_DRIVER);
    };
}

/// Pin-change ISR body: catches the falling start-bit edge.
///
/// # Example
/// ```rust,ignore
/// #[interrupt]
/// fn PCINT1() {
///     io_edge_card!();
/// }
/// ```
#[macro_export]
macro_rules! io_edge_card {
    () => {
        $crate::timer::global_card_io_edge(&CARD_DRIVER);
    };
}

/// Main-loop step: consumes ISR completion flags and advances the
/// session script.
///
/// # Example
/// ```rust,ignore
/// answer_to_reset_card!();
/// loop {
///     poll_card!();
/// }
/// ```
#[macro_export]
macro_rules! poll_card {
    () => {
        $crate::timer::global_card_poll(&CARD_DRIVER);
    };
}

/// Starts the session with the ATR, after the post-reset wait window.
#[macro_export]
macro_rules! answer_to_reset_card {
    () => {
        $crate::timer::global_card_answer_to_reset(&CARD_DRIVER);
    };
}
