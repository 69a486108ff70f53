use structopt::StructOpt;

#[derive(Clone, StructOpt)]
#[structopt(
    name = "aeshash-mitm",
    about = "Meet-in-the-middle preimage search against reduced-round AES hashing modes."
)]
pub enum MitmOptions {
    #[structopt(name = "four-round")]
    FourRound {
        #[structopt(short = "l", long = "limit")]
        /**
        If provided, stop after this many structures have been searched instead of running until a preimage is found.
        */
        limit: Option<usize>,
    },

    #[structopt(name = "seven-round")]
    SevenRound {
        #[structopt(short = "t", long = "threads")]
        /**
        The number of worker threads searching structures. Defaults to the number of logical CPUs.
        */
        threads: Option<usize>,

        #[structopt(short = "l", long = "limit")]
        /**
        If provided, stop after this many structures have been searched instead of running until a preimage is found.
        */
        limit: Option<usize>,
    },

    #[structopt(name = "seven-deep")]
    SevenDeep {
        #[structopt(short = "l", long = "limit")]
        /**
        If provided, stop after this many structures have been searched instead of running until a preimage is found.
        */
        limit: Option<usize>,
    },

    #[structopt(name = "calc")]
    Calc,
}
